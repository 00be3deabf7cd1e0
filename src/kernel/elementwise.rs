use num_traits::Float;

use crate::codelet::ScalarArgs;
use crate::error::TesseraResult;
use crate::runtime::TileAccess;
use crate::tensor::Element;
use super::{cast, check_len, single, source_and_target, KernelFloat};

/// `dst = value`
pub fn fill<T: KernelFloat>(accesses: &mut [TileAccess], args: &ScalarArgs) -> TesseraResult<()> {
    let value = cast::<T>(args.scalar(0)?)?;
    single::<T>(accesses)?.fill(value);
    Ok(())
}

pub fn clear<T: KernelFloat>(accesses: &mut [TileAccess], _args: &ScalarArgs) -> TesseraResult<()> {
    single::<T>(accesses)?.fill(T::zero());
    Ok(())
}

/// `dst = alpha + beta * dst`
pub fn add_scalar<T: KernelFloat>(accesses: &mut [TileAccess], args: &ScalarArgs) -> TesseraResult<()> {
    let alpha = cast::<T>(args.scalar(0)?)?;
    let beta = cast::<T>(args.scalar(1)?)?;
    let dst = single::<T>(accesses)?;
    if beta == T::zero() {
        dst.fill(alpha);
    } else {
        dst.iter_mut().for_each(|v| *v = alpha + beta * *v);
    }
    Ok(())
}

/// `dst = alpha * src + beta * dst`. With `beta == 0` the old contents of
/// `dst` are never read.
pub fn add<T: KernelFloat>(accesses: &mut [TileAccess], args: &ScalarArgs) -> TesseraResult<()> {
    let alpha = cast::<T>(args.scalar(0)?)?;
    let beta = cast::<T>(args.scalar(1)?)?;
    let (src, dst) = source_and_target::<T>(accesses)?;
    check_len("src", src.len(), dst.len())?;
    if beta == T::zero() {
        for (d, &s) in dst.iter_mut().zip(src) {
            *d = alpha * s;
        }
    } else {
        for (d, &s) in dst.iter_mut().zip(src) {
            *d = alpha * s + beta * *d;
        }
    }
    Ok(())
}

/// `dst = hypot(alpha * src, beta * dst)`
pub fn hypot<T: KernelFloat>(accesses: &mut [TileAccess], args: &ScalarArgs) -> TesseraResult<()> {
    let alpha = cast::<T>(args.scalar(0)?)?;
    let beta = cast::<T>(args.scalar(1)?)?;
    let (src, dst) = source_and_target::<T>(accesses)?;
    check_len("src", src.len(), dst.len())?;
    let zero = T::zero();
    for (d, &s) in dst.iter_mut().zip(src) {
        *d = if alpha == zero {
            (beta * *d).abs()
        } else if beta == zero {
            (alpha * s).abs()
        } else {
            (alpha * s).hypot(beta * *d)
        };
    }
    Ok(())
}

/// `dst = max(src, dst)`
pub fn maximum<T: KernelFloat>(accesses: &mut [TileAccess], _args: &ScalarArgs) -> TesseraResult<()> {
    let (src, dst) = source_and_target::<T>(accesses)?;
    check_len("src", src.len(), dst.len())?;
    for (d, &s) in dst.iter_mut().zip(src) {
        *d = Float::max(*d, s);
    }
    Ok(())
}

/// GeLU, tanh approximation: `0.5 x (1 + tanh(sqrt(2/pi) (x + 0.044715 x^3)))`
pub fn gelutanh<T: KernelFloat>(accesses: &mut [TileAccess], _args: &ScalarArgs) -> TesseraResult<()> {
    let half = cast::<T>(0.5)?;
    let one = T::one();
    let coeff = cast::<T>(0.7978845608028654)?;
    let cubic = cast::<T>(0.044715)?;
    for v in single::<T>(accesses)?.iter_mut() {
        let x = *v;
        *v = half * x * (one + (coeff * (x + cubic * x * x * x)).tanh());
    }
    Ok(())
}

pub fn copy<T: Element>(accesses: &mut [TileAccess], _args: &ScalarArgs) -> TesseraResult<()> {
    let (src, dst) = source_and_target::<T>(accesses)?;
    check_len("src", src.len(), dst.len())?;
    dst.copy_from_slice(src);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::testing::run;
    use crate::tensor::storage::TileData;

    fn scalars(values: &[f64]) -> ScalarArgs {
        ScalarArgs::new().with_scalars(values)
    }

    #[test]
    fn test_fill_and_clear() {
        let out = run(vec![TileData::F32(vec![1.0; 3])], |a| fill::<f32>(a, &scalars(&[7.0])).unwrap());
        assert_eq!(out, TileData::F32(vec![7.0; 3]));
        let out = run(vec![TileData::F64(vec![1.0; 2])], |a| clear::<f64>(a, &ScalarArgs::new()).unwrap());
        assert_eq!(out, TileData::F64(vec![0.0; 2]));
    }

    #[test]
    fn test_add_scalar() {
        let out = run(vec![TileData::F64(vec![1.0, 2.0])], |a| {
            add_scalar::<f64>(a, &scalars(&[1.0, 2.0])).unwrap()
        });
        assert_eq!(out, TileData::F64(vec![3.0, 5.0]));
        let out = run(vec![TileData::F64(vec![f64::NAN])], |a| {
            add_scalar::<f64>(a, &scalars(&[4.0, 0.0])).unwrap()
        });
        assert_eq!(out, TileData::F64(vec![4.0]));
    }

    #[test]
    fn test_add() {
        let out = run(
            vec![TileData::F32(vec![1.0, 2.0]), TileData::F32(vec![10.0, 20.0])],
            |a| add::<f32>(a, &scalars(&[2.0, 0.5])).unwrap(),
        );
        assert_eq!(out, TileData::F32(vec![7.0, 14.0]));
        let out = run(
            vec![TileData::F32(vec![1.0]), TileData::F32(vec![f32::NAN])],
            |a| add::<f32>(a, &scalars(&[3.0, 0.0])).unwrap(),
        );
        assert_eq!(out, TileData::F32(vec![3.0]));
    }

    #[test]
    fn test_hypot() {
        let out = run(
            vec![TileData::F64(vec![3.0, 1.0]), TileData::F64(vec![2.0, -2.0])],
            |a| hypot::<f64>(a, &scalars(&[1.0, 2.0])).unwrap(),
        );
        let values = out.as_slice::<f64>().unwrap();
        assert_eq!(values[0], 5.0);
        assert!((values[1] - 17f64.sqrt()).abs() < 1e-12);
        let out = run(
            vec![TileData::F64(vec![-3.0]), TileData::F64(vec![f64::NAN])],
            |a| hypot::<f64>(a, &scalars(&[1.0, 0.0])).unwrap(),
        );
        assert_eq!(out, TileData::F64(vec![3.0]));
    }

    #[test]
    fn test_maximum_and_copy() {
        let out = run(
            vec![TileData::F32(vec![1.0, 5.0]), TileData::F32(vec![2.0, 3.0])],
            |a| maximum::<f32>(a, &ScalarArgs::new()).unwrap(),
        );
        assert_eq!(out, TileData::F32(vec![2.0, 5.0]));
        let out = run(
            vec![TileData::F32(vec![1.0, 5.0]), TileData::F32(vec![0.0, 0.0])],
            |a| copy::<f32>(a, &ScalarArgs::new()).unwrap(),
        );
        assert_eq!(out, TileData::F32(vec![1.0, 5.0]));
    }

    #[test]
    fn test_gelutanh() {
        let out = run(vec![TileData::F64(vec![-1.0, 0.0, 1.0, 10.0])], |a| {
            gelutanh::<f64>(a, &ScalarArgs::new()).unwrap()
        });
        let values = out.as_slice::<f64>().unwrap();
        assert!((values[0] + 0.158808).abs() < 1e-5);
        assert_eq!(values[1], 0.0);
        assert!((values[2] - 0.841192).abs() < 1e-5);
        assert!((values[3] - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_kernel_argument_errors() {
        run(vec![TileData::F32(vec![1.0]), TileData::F32(vec![1.0, 2.0])], |a| {
            assert!(copy::<f32>(a, &ScalarArgs::new()).is_err());
        });
        run(vec![TileData::F32(vec![1.0])], |a| {
            assert!(fill::<f32>(a, &ScalarArgs::new()).is_err());
            assert!(fill::<f64>(a, &scalars(&[1.0])).is_err());
        });
    }
}

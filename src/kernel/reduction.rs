//! Per-slice statistics and renormalization along one axis.
//!
//! A statistics tile is laid out as `[2, m, n]`: `sum` at even offsets and
//! the Euclidean norm at odd offsets.

use crate::codelet::ScalarArgs;
use crate::error::TesseraResult;
use crate::runtime::TileAccess;
use super::{cast, check_len, source_and_target, two_sources_and_target, KernelFloat};

/// Accumulate sums and norms of a `[m, k, n]` source into a `[2, m, n]`
/// destination. Norms combine as `hypot(old, new)`.
///
/// Dims: `[m, n, k]`
pub fn sumnorm<T: KernelFloat>(accesses: &mut [TileAccess], args: &ScalarArgs) -> TesseraResult<()> {
    let (m, n, k) = (args.dim(0)?, args.dim(1)?, args.dim(2)?);
    let (src, dst) = source_and_target::<T>(accesses)?;
    check_len("src", src.len(), m * k * n)?;
    check_len("sumnorm", dst.len(), 2 * m * n)?;
    for i2 in 0..n {
        for i0 in 0..m {
            let mut sum = T::zero();
            let mut sumsq = T::zero();
            for i1 in 0..k {
                let value = src[i0 + m * (i1 + k * i2)];
                sum = sum + value;
                sumsq = sumsq + value * value;
            }
            let offset = 2 * (i0 + m * i2);
            dst[offset] = dst[offset] + sum;
            dst[offset + 1] = dst[offset + 1].hypot(sumsq.sqrt());
        }
    }
    Ok(())
}

/// `dst = gamma * (dst - mean) / dev + beta` along the middle axis of a
/// `[m, k, n]` tile, with mean and deviation derived from a `[2, m, n]`
/// statistics tile over `l` elements and regularized by `eps`.
///
/// Buffers: `gamma_beta` (`[gamma, beta]`), statistics, destination.
/// Dims: `[m, n, k, l]`. Scalars: `[eps]`.
pub fn normalize<T: KernelFloat>(accesses: &mut [TileAccess], args: &ScalarArgs) -> TesseraResult<()> {
    let (m, n, k, l) = (args.dim(0)?, args.dim(1)?, args.dim(2)?, args.dim(3)?);
    let eps = cast::<T>(args.scalar(0)?)?;
    let (gamma_beta, stats, dst) = two_sources_and_target::<T>(accesses)?;
    check_len("gamma_beta", gamma_beta.len(), 2)?;
    check_len("sumnorm", stats.len(), 2 * m * n)?;
    check_len("dst", dst.len(), m * k * n)?;
    let (gamma, beta) = (gamma_beta[0], gamma_beta[1]);

    let one = T::one();
    let inv_l = one / cast::<T>(l as f64)?;
    let rinv_l = inv_l.sqrt();
    let reps = eps.sqrt();
    for i2 in 0..n {
        for i1 in 0..k {
            for i0 in 0..m {
                let offset = 2 * (i0 + m * i2);
                let mean = stats[offset] * inv_l;
                let rms = stats[offset + 1] * rinv_l;
                let dev = deviation(mean, rms, reps);
                let value = &mut dst[i0 + m * (i1 + k * i2)];
                *value = (*value - mean) / dev * gamma + beta;
            }
        }
    }
    Ok(())
}

/// `sqrt(rms^2 - mean^2 + eps)`, scaled to avoid overflow and guarded
/// against rounding pushing `|mean| / rms` past one.
fn deviation<T: KernelFloat>(mean: T, rms: T, reps: T) -> T {
    let one = T::one();
    let ratio = mean.abs() / rms;
    if !(ratio < one) {
        reps
    } else if rms > reps {
        let scaled = reps / rms;
        rms * (one - ratio * ratio + scaled * scaled).sqrt()
    } else {
        let scaled = rms / reps;
        reps * ((one - ratio * ratio) * scaled * scaled + one).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::testing::run;
    use crate::tensor::storage::TileData;

    #[test]
    fn test_sumnorm_accumulates() {
        // [m=1, k=3, n=2]
        let src = TileData::F64(vec![1.0, 2.0, 2.0, 3.0, 0.0, 4.0]);
        let dst = TileData::F64(vec![10.0, 0.0, 0.0, 3.0]);
        let out = run(vec![src, dst], |a| {
            sumnorm::<f64>(a, &ScalarArgs::new().with_dims(&[1, 2, 3])).unwrap()
        });
        let values = out.as_slice::<f64>().unwrap();
        assert_eq!(values[0], 15.0);
        assert!((values[1] - 3.0).abs() < 1e-12);
        assert_eq!(values[2], 7.0);
        assert!((values[3] - 34f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_sumnorm_leading_axis() {
        // [m=2, k=2, n=1]: slices are (src[0], src[2]) and (src[1], src[3])
        let src = TileData::F32(vec![1.0, 3.0, 2.0, 4.0]);
        let out = run(vec![src, TileData::F32(vec![0.0; 4])], |a| {
            sumnorm::<f32>(a, &ScalarArgs::new().with_dims(&[2, 1, 2])).unwrap()
        });
        let values = out.as_slice::<f32>().unwrap();
        assert_eq!(values[0], 3.0);
        assert!((values[1] - 5f32.sqrt()).abs() < 1e-6);
        assert_eq!(values[2], 7.0);
        assert!((values[3] - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_normalize() {
        let values = [1.0, 2.0, 3.0, 4.0];
        let sum: f64 = values.iter().sum();
        let norm = values.iter().map(|v| v * v).sum::<f64>().sqrt();
        let out = run(
            vec![
                TileData::F64(vec![2.0, 1.0]),
                TileData::F64(vec![sum, norm]),
                TileData::F64(values.to_vec()),
            ],
            |a| {
                normalize::<f64>(a, &ScalarArgs::new().with_dims(&[1, 1, 4, 4]).with_scalars(&[0.0]))
                    .unwrap()
            },
        );
        let std = 1.25f64.sqrt();
        for (got, x) in out.as_slice::<f64>().unwrap().iter().zip(values) {
            let expected = 2.0 * (x - 2.5) / std + 1.0;
            assert!((got - expected).abs() < 1e-12, "{} vs {}", got, expected);
        }
    }

    #[test]
    fn test_deviation_guards() {
        // Constant slice: the deviation falls back to sqrt(eps).
        assert_eq!(deviation(2.0f64, 2.0, 0.1), 0.1);
        let small = deviation(0.0f64, 1e-3, 1.0);
        assert!((small - (1.0f64 + 1e-6).sqrt()).abs() < 1e-12);
    }
}

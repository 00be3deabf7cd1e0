//! Normally distributed fill, keyed by global element index

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::codelet::ScalarArgs;
use crate::error::{TesseraError, TesseraResult};
use crate::runtime::TileAccess;
use super::{cast, check_len, single, KernelFloat};

/// Standard normal sample for element `index` of the stream `seed`
pub fn normal_sample(seed: u64, index: u64) -> f64 {
    let mut key = [0u8; 32];
    key[..8].copy_from_slice(&seed.to_le_bytes());
    key[8..16].copy_from_slice(&index.to_le_bytes());
    StdRng::from_seed(key).sample(StandardNormal)
}

/// `dst = mean + stddev * N(0, 1)` where every element draws from its
/// column-major index in the whole tensor, so values do not depend on the
/// tiling.
///
/// Dims: `[ndim, tile_shape.., tile_start.., tensor_shape..]`.
/// Scalars: `[mean, stddev]`.
pub fn randn<T: KernelFloat>(accesses: &mut [TileAccess], args: &ScalarArgs) -> TesseraResult<()> {
    let ndim = args.dim(0)?;
    if args.dims.len() != 1 + 3 * ndim {
        return Err(TesseraError::InvalidInput(format!(
            "randn layout for {} axes has {} entries",
            ndim,
            args.dims.len()
        )));
    }
    let shape = &args.dims[1..1 + ndim];
    let start = &args.dims[1 + ndim..1 + 2 * ndim];
    let global = &args.dims[1 + 2 * ndim..];
    let mean = args.scalar(0)?;
    let stddev = args.scalar(1)?;
    let dst = single::<T>(accesses)?;
    check_len("dst", dst.len(), shape.iter().product())?;

    let mut index = vec![0usize; ndim];
    for value in dst.iter_mut() {
        let mut linear = 0u64;
        let mut stride = 1u64;
        for axis in 0..ndim {
            linear += ((start[axis] + index[axis]) as u64) * stride;
            stride *= global[axis] as u64;
        }
        *value = cast::<T>(mean + stddev * normal_sample(args.seed, linear))?;
        for (axis, i) in index.iter_mut().enumerate() {
            *i += 1;
            if *i < shape[axis] {
                break;
            }
            *i = 0;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::testing::run;
    use crate::tensor::storage::TileData;

    fn randn_tile(shape: &[usize], start: &[usize], global: &[usize], seed: u64) -> Vec<f64> {
        let mut dims = vec![shape.len()];
        dims.extend_from_slice(shape);
        dims.extend_from_slice(start);
        dims.extend_from_slice(global);
        let args = ScalarArgs::new().with_dims(&dims).with_scalars(&[0.0, 1.0]).with_seed(seed);
        let nelems = shape.iter().product();
        let out = run(vec![TileData::F64(vec![0.0; nelems])], |a| randn::<f64>(a, &args).unwrap());
        out.as_slice::<f64>().unwrap().to_vec()
    }

    #[test]
    fn test_tiling_independent() {
        let whole = randn_tile(&[4, 2], &[0, 0], &[4, 2], 42);
        // Rows 2..4 of column 1 have global indices 6 and 7.
        let part = randn_tile(&[2, 1], &[2, 1], &[4, 2], 42);
        assert_eq!(part, whole[6..8].to_vec());
    }

    #[test]
    fn test_seed_changes_values() {
        let a = randn_tile(&[8], &[0], &[8], 1);
        let b = randn_tile(&[8], &[0], &[8], 2);
        assert_ne!(a, b);
        assert_eq!(a, randn_tile(&[8], &[0], &[8], 1));
    }

    #[test]
    fn test_sample_moments() {
        let n = 20_000u64;
        let samples: Vec<f64> = (0..n).map(|i| normal_sample(7, i)).collect();
        let mean = samples.iter().sum::<f64>() / n as f64;
        let var = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64;
        assert!(mean.abs() < 0.05, "mean {}", mean);
        assert!((var - 1.0).abs() < 0.05, "variance {}", var);
    }

    #[test]
    fn test_scalar_tile() {
        let value = randn_tile(&[], &[], &[], 3);
        assert_eq!(value.len(), 1);
        assert_eq!(value[0], normal_sample(3, 0));
    }
}

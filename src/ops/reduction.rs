//! Statistics along one axis and renormalization using them

use crate::codelet::builtin::{CLEAR, NORMALIZE, SUMNORM};
use crate::codelet::ScalarArgs;
use crate::error::{TesseraError, TesseraResult};
use crate::runtime::{AccessMode, Batch, NodeContext};
use crate::tensor::Tensor;
use super::engine::{check_axis, check_dtype, check_sliced, complete, reduced_coord, TileSubmitter};

/// A tensor of shape `[2, ..]` whose first axis is a single tile
fn check_stats_layout(op: &str, stats: &Tensor) -> TesseraResult<()> {
    if stats.shape().first() != Some(&2) || stats.basetile_shape().first() != Some(&2) {
        return Err(TesseraError::shape_error(
            &format!("{} statistics with leading extent and basetile 2", op),
            &format!("shape {:?}, basetile {:?}", stats.shape(), stats.basetile_shape()),
            None,
        ));
    }
    Ok(())
}

/// Accumulate per-slice sums and Euclidean norms of `src` along `axis` into
/// `dst`, shaped `[2] ++ src.shape without axis`. Destination tiles are
/// cleared first.
pub fn sumnorm_async(ctx: &NodeContext, src: &Tensor, dst: &Tensor, axis: usize) -> TesseraResult<Batch> {
    if src.ndim() == 0 {
        return Err(TesseraError::InvalidInput(
            "sumnorm: a zero-dimensional source has no axis to reduce".to_string(),
        ));
    }
    check_axis(SUMNORM, axis, src.ndim())?;
    check_stats_layout(SUMNORM, dst)?;
    check_sliced(SUMNORM, src, dst, axis, 1)?;

    let mut submitter = TileSubmitter::new(ctx, SUMNORM, dst, &[src])?;
    let clear = submitter.companion(CLEAR)?;
    let src_coords: Vec<Vec<usize>> = src.grid().coords().collect();
    for (dst_index, dst_coord) in dst.grid().coords().enumerate() {
        let dst_tile = dst.tile_handle(dst_index)?;
        submitter.submit_with(&clear, dst_tile, &[(dst_tile, AccessMode::Write)], ScalarArgs::new())?;
        for (src_index, src_coord) in src_coords.iter().enumerate() {
            if reduced_coord(src_coord, axis, 1) != dst_coord {
                continue;
            }
            let src_tile = src.tile_handle(src_index)?;
            let (m, k, n) = src.tile_traits(src_index)?.split_at_axis(axis);
            submitter.transfer(src_tile, dst_tile.owner())?;
            submitter.submit(
                dst_tile,
                &[(src_tile, AccessMode::Read), (dst_tile, AccessMode::ReadWrite)],
                ScalarArgs::new().with_dims(&[m, n, k]),
            )?;
        }
        submitter.flush(dst_tile)?;
    }
    Ok(submitter.finish())
}

pub fn sumnorm(ctx: &NodeContext, src: &Tensor, dst: &Tensor, axis: usize) -> TesseraResult<()> {
    complete(ctx, sumnorm_async(ctx, src, dst, axis))
}

/// Renormalize `dst` along `axis` with the statistics in `sumnorm` computed
/// over `size` elements, then scale by `gamma` and shift by `beta` taken from
/// the single-tile `gamma_beta`.
pub fn normalize_async(
    ctx: &NodeContext,
    gamma_beta: &Tensor,
    sumnorm: &Tensor,
    dst: &Tensor,
    size: usize,
    eps: f64,
    axis: usize,
) -> TesseraResult<Batch> {
    if gamma_beta.shape() != [2] || gamma_beta.tile_count() != 1 {
        return Err(TesseraError::shape_error(
            "normalize gamma_beta of shape [2] in a single tile",
            &format!("shape {:?} in {} tiles", gamma_beta.shape(), gamma_beta.tile_count()),
            None,
        ));
    }
    check_dtype(NORMALIZE, dst, gamma_beta)?;
    if size == 0 {
        return Err(TesseraError::InvalidInput("normalize: size must be positive".to_string()));
    }
    if !(eps > 0.0) {
        return Err(TesseraError::InvalidInput(format!("normalize: eps must be positive, got {}", eps)));
    }
    check_axis(NORMALIZE, axis, dst.ndim())?;
    check_stats_layout(NORMALIZE, sumnorm)?;
    check_sliced(NORMALIZE, dst, sumnorm, axis, 1)?;

    let mut submitter = TileSubmitter::new(ctx, NORMALIZE, dst, &[gamma_beta, sumnorm])?;
    let gamma_beta_tile = gamma_beta.tile_handle(0)?;
    for (dst_index, dst_coord) in dst.grid().coords().enumerate() {
        let dst_tile = dst.tile_handle(dst_index)?;
        let stats_index = sumnorm.grid().coord_to_linear(&reduced_coord(&dst_coord, axis, 1))?;
        let stats_tile = sumnorm.tile_handle(stats_index)?;
        let (m, k, n) = dst.tile_traits(dst_index)?.split_at_axis(axis);
        submitter.transfer(gamma_beta_tile, dst_tile.owner())?;
        submitter.transfer(stats_tile, dst_tile.owner())?;
        submitter.submit(
            dst_tile,
            &[
                (gamma_beta_tile, AccessMode::Read),
                (stats_tile, AccessMode::Read),
                (dst_tile, AccessMode::ReadWrite),
            ],
            ScalarArgs::new().with_dims(&[m, n, k, size]).with_scalars(&[eps]),
        )?;
        submitter.flush(dst_tile)?;
    }
    Ok(submitter.finish())
}

pub fn normalize(
    ctx: &NodeContext,
    gamma_beta: &Tensor,
    sumnorm: &Tensor,
    dst: &Tensor,
    size: usize,
    eps: f64,
    axis: usize,
) -> TesseraResult<()> {
    complete(ctx, normalize_async(ctx, gamma_beta, sumnorm, dst, size, eps, axis))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::codelet::CodeletRegistry;
    use crate::config::ConfigBuilder;
    use crate::runtime::ProcessGroup;
    use crate::tensor::{DType, Distribution};

    fn run_on<F>(world_size: usize, f: F)
    where
        F: Fn(&NodeContext) -> TesseraResult<()> + Sync,
    {
        let config = ConfigBuilder::new().world_size(world_size).build().unwrap();
        let registry = Arc::new(CodeletRegistry::with_builtin().unwrap());
        ProcessGroup::new(config).unwrap().spmd(registry, f).unwrap();
    }

    #[test]
    fn test_sumnorm_across_tiles() {
        run_on(2, |ctx| {
            // 3x4 column-major, values 1..=12, split along both axes
            let src = Tensor::from_shape(ctx, &[3, 4], &[2, 3], DType::F64, &Distribution::round_robin(vec![2, 2], 2)?)?;
            let dst = Tensor::from_shape(ctx, &[2, 4], &[2, 3], DType::F64, &Distribution::round_robin(vec![1, 2], 2)?)?;
            let values: Vec<f64> = (1..=12).map(f64::from).collect();
            let tiles = [
                vec![values[0], values[1], values[3], values[4], values[6], values[7]],
                vec![values[2], values[5], values[8]],
                vec![values[9], values[10]],
                vec![values[11]],
            ];
            for (i, tile) in tiles.iter().enumerate() {
                src.write_tile(ctx, i, tile)?;
            }
            sumnorm(ctx, &src, &dst, 0)?;
            let batch = dst.replicate(ctx)?;
            batch.wait(ctx)?;

            let mut got = dst.read_tile::<f64>(ctx, 0)?;
            got.extend(dst.read_tile::<f64>(ctx, 1)?);
            for column in 0..4 {
                let slice = &values[3 * column..3 * column + 3];
                let sum: f64 = slice.iter().sum();
                let norm = slice.iter().map(|v| v * v).sum::<f64>().sqrt();
                assert!((got[2 * column] - sum).abs() < 1e-12);
                assert!((got[2 * column + 1] - norm).abs() < 1e-12);
            }
            Ok(())
        });
    }

    #[test]
    fn test_sumnorm_rejects_bad_layout() {
        run_on(1, |ctx| {
            let dist = Distribution::single(0);
            let src = Tensor::from_shape(ctx, &[3, 4], &[3, 4], DType::F32, &dist)?;
            let narrow = Tensor::from_shape(ctx, &[2, 4], &[1, 4], DType::F32, &dist)?;
            let wrong = Tensor::from_shape(ctx, &[2, 3], &[2, 3], DType::F32, &dist)?;
            let scalar = Tensor::from_shape(ctx, &[], &[], DType::F32, &dist)?;
            assert!(matches!(sumnorm_async(ctx, &src, &narrow, 0), Err(TesseraError::ShapeMismatch(_))));
            assert!(matches!(sumnorm_async(ctx, &src, &wrong, 0), Err(TesseraError::ShapeMismatch(_))));
            assert!(matches!(sumnorm_async(ctx, &src, &wrong, 2), Err(TesseraError::InvalidInput(_))));
            assert!(matches!(sumnorm_async(ctx, &scalar, &wrong, 0), Err(TesseraError::InvalidInput(_))));
            assert_eq!(ctx.stats().tasks_submitted, 0);
            Ok(())
        });
    }

    #[test]
    fn test_normalize_gives_unit_deviation() {
        run_on(2, |ctx| {
            let src = Tensor::from_shape(ctx, &[8, 3], &[3, 2], DType::F64, &Distribution::round_robin(vec![3, 2], 2)?)?;
            let stats = Tensor::from_shape(ctx, &[2, 3], &[2, 2], DType::F64, &Distribution::round_robin(vec![1, 2], 2)?)?;
            let gamma_beta = Tensor::from_shape(ctx, &[2], &[2], DType::F64, &Distribution::single(1))?;
            gamma_beta.write_tile(ctx, 0, &[1.0, 0.0])?;
            crate::ops::randn(ctx, &src, 5, 3.0, 2.0)?;
            sumnorm(ctx, &src, &stats, 0)?;
            normalize(ctx, &gamma_beta, &stats, &src, 8, 1e-12, 0)?;
            sumnorm(ctx, &src, &stats, 0)?;
            let batch = stats.replicate(ctx)?;
            batch.wait(ctx)?;

            let mut got = stats.read_tile::<f64>(ctx, 0)?;
            got.extend(stats.read_tile::<f64>(ctx, 1)?);
            for column in 0..3 {
                let mean = got[2 * column] / 8.0;
                let rms = got[2 * column + 1] / 8f64.sqrt();
                assert!(mean.abs() < 1e-9, "mean {}", mean);
                assert!((rms - 1.0).abs() < 1e-6, "rms {}", rms);
            }
            Ok(())
        });
    }

    #[test]
    fn test_normalize_argument_checks() {
        run_on(1, |ctx| {
            let dist = Distribution::single(0);
            let dst = Tensor::from_shape(ctx, &[4, 2], &[4, 2], DType::F64, &dist)?;
            let stats = Tensor::from_shape(ctx, &[2, 2], &[2, 2], DType::F64, &dist)?;
            let gamma_beta = Tensor::from_shape(ctx, &[2], &[2], DType::F64, &dist)?;
            let split = Tensor::from_shape(ctx, &[2], &[1], DType::F64, &dist)?;
            assert!(matches!(
                normalize_async(ctx, &split, &stats, &dst, 4, 1e-5, 0),
                Err(TesseraError::ShapeMismatch(_))
            ));
            assert!(matches!(
                normalize_async(ctx, &gamma_beta, &stats, &dst, 0, 1e-5, 0),
                Err(TesseraError::InvalidInput(_))
            ));
            assert!(matches!(
                normalize_async(ctx, &gamma_beta, &stats, &dst, 4, 0.0, 0),
                Err(TesseraError::InvalidInput(_))
            ));
            Ok(())
        });
    }
}

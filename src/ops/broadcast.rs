//! Operations broadcasting a lower-dimensional tensor along one axis

use crate::codelet::builtin::{ADD_SLICE, BIASPROD};
use crate::codelet::ScalarArgs;
use crate::error::TesseraResult;
use crate::runtime::{AccessMode, Batch, NodeContext};
use crate::tensor::Tensor;
use super::engine::{check_sliced, complete, reduced_coord, TileSubmitter};

fn broadcast_along(
    ctx: &NodeContext,
    op: &'static str,
    src: &Tensor,
    dst: &Tensor,
    axis: usize,
    mode: AccessMode,
    scalars: &[f64],
) -> TesseraResult<Batch> {
    let mut submitter = TileSubmitter::new(ctx, op, dst, &[src])?;
    for (dst_index, dst_coord) in dst.grid().coords().enumerate() {
        let dst_tile = dst.tile_handle(dst_index)?;
        let src_index = src.grid().coord_to_linear(&reduced_coord(&dst_coord, axis, 0))?;
        let src_tile = src.tile_handle(src_index)?;
        let (m, k, n) = dst.tile_traits(dst_index)?.split_at_axis(axis);
        submitter.transfer(src_tile, dst_tile.owner())?;
        submitter.submit(
            dst_tile,
            &[(src_tile, AccessMode::Read), (dst_tile, mode)],
            ScalarArgs::new().with_dims(&[m, n, k]).with_scalars(scalars),
        )?;
        submitter.flush(dst_tile)?;
    }
    Ok(submitter.finish())
}

/// `dst *= src`, with `src` repeated along `axis` of `dst`
pub fn biasprod_async(ctx: &NodeContext, src: &Tensor, dst: &Tensor, axis: usize) -> TesseraResult<Batch> {
    check_sliced(BIASPROD, dst, src, axis, 0)?;
    broadcast_along(ctx, BIASPROD, src, dst, axis, AccessMode::ReadWrite, &[])
}

pub fn biasprod(ctx: &NodeContext, src: &Tensor, dst: &Tensor, axis: usize) -> TesseraResult<()> {
    complete(ctx, biasprod_async(ctx, src, dst, axis))
}

/// `dst = alpha * src + beta * dst`, with `src` repeated along `axis` of
/// `dst`. Submits nothing when `alpha == 0` and `beta == 1`.
pub fn add_slice_async(
    ctx: &NodeContext,
    alpha: f64,
    src: &Tensor,
    beta: f64,
    dst: &Tensor,
    axis: usize,
) -> TesseraResult<Batch> {
    check_sliced(ADD_SLICE, dst, src, axis, 0)?;
    if alpha == 0.0 && beta == 1.0 {
        return Ok(Batch::new(ADD_SLICE));
    }
    let mode = if beta == 0.0 { AccessMode::Write } else { AccessMode::ReadWrite };
    broadcast_along(ctx, ADD_SLICE, src, dst, axis, mode, &[alpha, beta])
}

pub fn add_slice(ctx: &NodeContext, alpha: f64, src: &Tensor, beta: f64, dst: &Tensor, axis: usize) -> TesseraResult<()> {
    complete(ctx, add_slice_async(ctx, alpha, src, beta, dst, axis))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::codelet::CodeletRegistry;
    use crate::config::ConfigBuilder;
    use crate::error::TesseraError;
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
    fn test_biasprod_middle_axis() {
        run_on(2, |ctx| {
            // dst [2, 3, 2] broadcast along axis 1, tiled in two along it
            let dst = Tensor::from_shape(ctx, &[2, 3, 2], &[2, 2, 2], DType::F64, &Distribution::round_robin(vec![1, 2, 1], 2)?)?;
            let src = Tensor::from_shape(ctx, &[2, 2], &[2, 2], DType::F64, &Distribution::single(1))?;
            crate::ops::fill(ctx, 2.0, &dst)?;
            src.write_tile(ctx, 0, &[1.0, 2.0, 3.0, 4.0])?;
            biasprod(ctx, &src, &dst, 1)?;
            dst.replicate(ctx)?.wait(ctx)?;

            // tile 0 is [2, 2, 2], tile 1 is [2, 1, 2]
            let first = dst.read_tile::<f64>(ctx, 0)?;
            let second = dst.read_tile::<f64>(ctx, 1)?;
            assert_eq!(first, vec![2.0, 4.0, 2.0, 4.0, 6.0, 8.0, 6.0, 8.0]);
            assert_eq!(second, vec![2.0, 4.0, 6.0, 8.0]);
            Ok(())
        });
    }

    #[test]
    fn test_add_slice() {
        run_on(1, |ctx| {
            let dist = Distribution::single(0);
            let dst = Tensor::from_shape(ctx, &[2, 2], &[1, 2], DType::F32, &dist)?;
            let src = Tensor::from_shape(ctx, &[2], &[1], DType::F32, &dist)?;
            crate::ops::fill(ctx, 1.0, &dst)?;
            src.write_tile(ctx, 0, &[10.0f32])?;
            src.write_tile(ctx, 1, &[20.0f32])?;
            add_slice(ctx, 2.0, &src, 3.0, &dst, 1)?;
            assert_eq!(dst.read_tile::<f32>(ctx, 0)?, vec![23.0, 23.0]);
            assert_eq!(dst.read_tile::<f32>(ctx, 1)?, vec![43.0, 43.0]);

            let before = ctx.stats().tasks_submitted;
            assert!(add_slice_async(ctx, 0.0, &src, 1.0, &dst, 1)?.is_empty());
            assert_eq!(ctx.stats().tasks_submitted, before);
            Ok(())
        });
    }

    #[test]
    fn test_slice_shape_checks() {
        run_on(1, |ctx| {
            let dist = Distribution::single(0);
            let dst = Tensor::from_shape(ctx, &[2, 3], &[2, 3], DType::F64, &dist)?;
            let src = Tensor::from_shape(ctx, &[3], &[3], DType::F64, &dist)?;
            let retiled = Tensor::from_shape(ctx, &[2], &[1], DType::F64, &dist)?;
            assert!(matches!(biasprod_async(ctx, &src, &dst, 1), Err(TesseraError::ShapeMismatch(_))));
            assert!(matches!(biasprod_async(ctx, &retiled, &dst, 1), Err(TesseraError::ShapeMismatch(_))));
            assert!(matches!(add_slice_async(ctx, 1.0, &src, 1.0, &dst, 3), Err(TesseraError::InvalidInput(_))));
            assert_eq!(biasprod_async(ctx, &src, &dst, 0)?.task_count(), 1);
            ctx.wait_local()
        });
    }
}

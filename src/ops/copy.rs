//! Copying between tensors with different tilings and distributions

use std::ops::Range;

use crate::codelet::builtin::COPY_INTERSECTION;
use crate::codelet::ScalarArgs;
use crate::error::{TesseraError, TesseraResult};
use crate::kernel::copy::BlockCopy;
use crate::runtime::{AccessMode, Batch, NodeContext};
use crate::tensor::Tensor;
use super::engine::{check_dtype, complete, TileSubmitter};

/// Global extent of the tile at `coord` when the tensor sits at `offset`
fn placed_tile(tensor: &Tensor, coord: &[usize], offset: &[usize]) -> TesseraResult<Vec<Range<usize>>> {
    let traits = tensor.traits();
    let shape = traits.tile_shape(coord)?;
    let start = traits.tile_start(coord);
    Ok(offset
        .iter()
        .zip(start)
        .zip(shape)
        .map(|((&o, s), len)| o + s..o + s + len)
        .collect())
}

fn intersect(a: &[Range<usize>], b: &[Range<usize>]) -> Option<Vec<Range<usize>>> {
    let overlap: Vec<Range<usize>> = a
        .iter()
        .zip(b)
        .map(|(x, y)| x.start.max(y.start)..x.end.min(y.end))
        .collect();
    if overlap.iter().any(|r| r.start >= r.end) {
        None
    } else {
        Some(overlap)
    }
}

fn lengths(ranges: &[Range<usize>]) -> Vec<usize> {
    ranges.iter().map(|r| r.end - r.start).collect()
}

fn relative_start(block: &[Range<usize>], tile: &[Range<usize>]) -> Vec<usize> {
    block.iter().zip(tile).map(|(b, t)| b.start - t.start).collect()
}

/// Copy the region where `src` placed at `src_offset` overlaps `dst` placed
/// at `dst_offset`. The two tensors may be tiled and distributed
/// differently. Destination tiles outside the overlap are untouched.
pub fn copy_intersection_async(
    ctx: &NodeContext,
    src: &Tensor,
    src_offset: &[usize],
    dst: &Tensor,
    dst_offset: &[usize],
) -> TesseraResult<Batch> {
    if src.ndim() != dst.ndim() {
        return Err(TesseraError::shape_error(
            &format!("copy_intersection operands with {} dimensions", dst.ndim()),
            &format!("{} dimensions", src.ndim()),
            None,
        ));
    }
    if src_offset.len() != src.ndim() || dst_offset.len() != dst.ndim() {
        return Err(TesseraError::InvalidInput(format!(
            "copy_intersection offsets {:?} and {:?} for {} dimensions",
            src_offset,
            dst_offset,
            dst.ndim()
        )));
    }
    check_dtype(COPY_INTERSECTION, dst, src)?;

    let mut submitter = TileSubmitter::new(ctx, COPY_INTERSECTION, dst, &[src])?;
    let src_region: Vec<Range<usize>> = src_offset
        .iter()
        .zip(src.shape())
        .map(|(&o, &len)| o..o + len)
        .collect();
    let src_tiles = src
        .grid()
        .coords()
        .map(|coord| placed_tile(src, &coord, src_offset))
        .collect::<TesseraResult<Vec<_>>>()?;

    for (dst_index, dst_coord) in dst.grid().coords().enumerate() {
        let dst_extent = placed_tile(dst, &dst_coord, dst_offset)?;
        let covered = match intersect(&dst_extent, &src_region) {
            Some(covered) => covered,
            None => continue,
        };
        let dst_tile = dst.tile_handle(dst_index)?;
        let mut mode = if covered == dst_extent {
            AccessMode::Write
        } else {
            AccessMode::ReadWrite
        };
        for (src_index, src_extent) in src_tiles.iter().enumerate() {
            let block = match intersect(&dst_extent, src_extent) {
                Some(block) => block,
                None => continue,
            };
            let layout = BlockCopy {
                block: lengths(&block),
                src_shape: lengths(src_extent),
                src_start: relative_start(&block, src_extent),
                dst_shape: lengths(&dst_extent),
                dst_start: relative_start(&block, &dst_extent),
            };
            let src_tile = src.tile_handle(src_index)?;
            submitter.transfer(src_tile, dst_tile.owner())?;
            submitter.submit(
                dst_tile,
                &[(src_tile, AccessMode::Read), (dst_tile, mode)],
                ScalarArgs::new().with_dims(&layout.to_dims()),
            )?;
            // Later blocks must keep what earlier ones wrote.
            mode = AccessMode::ReadWrite;
        }
        submitter.flush(dst_tile)?;
    }
    Ok(submitter.finish())
}

pub fn copy_intersection(
    ctx: &NodeContext,
    src: &Tensor,
    src_offset: &[usize],
    dst: &Tensor,
    dst_offset: &[usize],
) -> TesseraResult<()> {
    complete(ctx, copy_intersection_async(ctx, src, src_offset, dst, dst_offset))
}

fn check_single_tile(op: &str, whole: &Tensor, other: &Tensor) -> TesseraResult<()> {
    if whole.shape() != other.shape() {
        return Err(TesseraError::shape_error(
            &format!("{} operands of shape {:?}", op, other.shape()),
            &format!("{:?}", whole.shape()),
            None,
        ));
    }
    if whole.tile_count() != 1 {
        return Err(TesseraError::shape_error(
            &format!("{} operand in a single tile", op),
            &format!("{} tiles", whole.tile_count()),
            None,
        ));
    }
    Ok(())
}

/// Collect every tile of `src` into the single tile of `dst`
pub fn gather_async(ctx: &NodeContext, src: &Tensor, dst: &Tensor) -> TesseraResult<Batch> {
    check_single_tile("gather", dst, src)?;
    let origin = vec![0; src.ndim()];
    copy_intersection_async(ctx, src, &origin, dst, &origin)
}

pub fn gather(ctx: &NodeContext, src: &Tensor, dst: &Tensor) -> TesseraResult<()> {
    complete(ctx, gather_async(ctx, src, dst))
}

/// Split the single tile of `src` across the tiles of `dst`
pub fn scatter_async(ctx: &NodeContext, src: &Tensor, dst: &Tensor) -> TesseraResult<Batch> {
    check_single_tile("scatter", src, dst)?;
    let origin = vec![0; src.ndim()];
    copy_intersection_async(ctx, src, &origin, dst, &origin)
}

pub fn scatter(ctx: &NodeContext, src: &Tensor, dst: &Tensor) -> TesseraResult<()> {
    complete(ctx, scatter_async(ctx, src, dst))
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
    fn test_intersect() {
        assert_eq!(intersect(&[0..4, 2..5], &[3..6, 0..3]), Some(vec![3..4, 2..3]));
        assert_eq!(intersect(&[0..2], &[2..4]), None);
        assert_eq!(intersect(&[], &[]), Some(vec![]));
    }

    #[test]
    fn test_scatter_then_gather() {
        run_on(3, |ctx| {
            let values: Vec<f64> = (0..20).map(f64::from).collect();
            let whole = Tensor::from_shape(ctx, &[4, 5], &[4, 5], DType::F64, &Distribution::single(2))?;
            let tiled = Tensor::from_shape(ctx, &[4, 5], &[3, 2], DType::F64, &Distribution::round_robin(vec![2, 3], 3)?)?;
            let back = Tensor::from_shape(ctx, &[4, 5], &[4, 5], DType::F64, &Distribution::single(0))?;
            whole.write_tile(ctx, 0, &values)?;

            scatter(ctx, &whole, &tiled)?;
            gather(ctx, &tiled, &back)?;
            if ctx.rank() == 0 {
                assert_eq!(back.read_tile::<f64>(ctx, 0)?, values);
            }
            Ok(())
        });
    }

    #[test]
    fn test_partial_overlap_keeps_rest() {
        run_on(2, |ctx| {
            let src = Tensor::from_shape(ctx, &[2, 2], &[1, 2], DType::F32, &Distribution::round_robin(vec![2, 1], 2)?)?;
            let dst = Tensor::from_shape(ctx, &[3, 3], &[3, 3], DType::F32, &Distribution::single(1))?;
            crate::ops::fill(ctx, 1.0, &src)?;
            crate::ops::fill(ctx, -1.0, &dst)?;
            // src covers rows 1..3 and columns 0..2 of dst
            copy_intersection(ctx, &src, &[1, 0], &dst, &[0, 0])?;
            if ctx.rank() == 1 {
                let got = dst.read_tile::<f32>(ctx, 0)?;
                assert_eq!(got, vec![-1.0, 1.0, 1.0, -1.0, 1.0, 1.0, -1.0, -1.0, -1.0]);
            }
            Ok(())
        });
    }

    #[test]
    fn test_disjoint_regions_submit_nothing() {
        run_on(1, |ctx| {
            let dist = Distribution::single(0);
            let src = Tensor::from_shape(ctx, &[2], &[1], DType::F64, &dist)?;
            let dst = Tensor::from_shape(ctx, &[2], &[2], DType::F64, &dist)?;
            let batch = copy_intersection_async(ctx, &src, &[5], &dst, &[0])?;
            assert!(batch.is_empty());
            assert!(matches!(
                copy_intersection_async(ctx, &src, &[0, 0], &dst, &[0]),
                Err(TesseraError::InvalidInput(_))
            ));
            assert!(matches!(gather_async(ctx, &dst, &src), Err(TesseraError::ShapeMismatch(_))));
            Ok(())
        });
    }
}

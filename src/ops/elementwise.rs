//! Tile-by-tile operations over tensors with identical tiling

use crate::codelet::builtin::{ADD, ADD_SCALAR, CLEAR, COPY, FILL, GELUTANH, HYPOT, MAXIMUM, RANDN};
use crate::codelet::ScalarArgs;
use crate::error::TesseraResult;
use crate::runtime::{AccessMode, Batch, NodeContext};
use crate::tensor::Tensor;
use super::engine::{check_same_layout, complete, TileSubmitter};

fn is_identity(alpha: f64, beta: f64) -> bool {
    alpha == 0.0 && beta == 1.0
}

/// Apply `op` to every tile of `dst` in place
fn unary(ctx: &NodeContext, op: &'static str, dst: &Tensor, mode: AccessMode, args: ScalarArgs) -> TesseraResult<Batch> {
    let mut submitter = TileSubmitter::new(ctx, op, dst, &[])?;
    for tile in dst.tiles() {
        submitter.submit(tile, &[(tile, mode)], args.clone())?;
        submitter.flush(tile)?;
    }
    Ok(submitter.finish())
}

/// Apply `op` to matching tiles of `src` and `dst`, writing `dst`
fn binary(
    ctx: &NodeContext,
    op: &'static str,
    src: &Tensor,
    dst: &Tensor,
    mode: AccessMode,
    args: ScalarArgs,
) -> TesseraResult<Batch> {
    check_same_layout(op, src, dst)?;
    let mut submitter = TileSubmitter::new(ctx, op, dst, &[src])?;
    for (src_tile, dst_tile) in src.tiles().iter().zip(dst.tiles()) {
        submitter.transfer(src_tile, dst_tile.owner())?;
        submitter.submit(dst_tile, &[(src_tile, AccessMode::Read), (dst_tile, mode)], args.clone())?;
        submitter.flush(dst_tile)?;
    }
    Ok(submitter.finish())
}

pub fn fill_async(ctx: &NodeContext, value: f64, dst: &Tensor) -> TesseraResult<Batch> {
    unary(ctx, FILL, dst, AccessMode::Write, ScalarArgs::new().with_scalars(&[value]))
}

pub fn fill(ctx: &NodeContext, value: f64, dst: &Tensor) -> TesseraResult<()> {
    complete(ctx, fill_async(ctx, value, dst))
}

pub fn clear_async(ctx: &NodeContext, dst: &Tensor) -> TesseraResult<Batch> {
    unary(ctx, CLEAR, dst, AccessMode::Write, ScalarArgs::new())
}

pub fn clear(ctx: &NodeContext, dst: &Tensor) -> TesseraResult<()> {
    complete(ctx, clear_async(ctx, dst))
}

/// `dst = alpha + beta * dst`. Submits nothing when `alpha == 0` and
/// `beta == 1`.
pub fn add_scalar_async(ctx: &NodeContext, alpha: f64, beta: f64, dst: &Tensor) -> TesseraResult<Batch> {
    if is_identity(alpha, beta) {
        return Ok(Batch::new(ADD_SCALAR));
    }
    let mode = if beta == 0.0 { AccessMode::Write } else { AccessMode::ReadWrite };
    unary(ctx, ADD_SCALAR, dst, mode, ScalarArgs::new().with_scalars(&[alpha, beta]))
}

pub fn add_scalar(ctx: &NodeContext, alpha: f64, beta: f64, dst: &Tensor) -> TesseraResult<()> {
    complete(ctx, add_scalar_async(ctx, alpha, beta, dst))
}

/// `dst = alpha * src + beta * dst`. Submits nothing when `alpha == 0` and
/// `beta == 1`.
pub fn add_async(ctx: &NodeContext, alpha: f64, src: &Tensor, beta: f64, dst: &Tensor) -> TesseraResult<Batch> {
    check_same_layout(ADD, src, dst)?;
    if is_identity(alpha, beta) {
        return Ok(Batch::new(ADD));
    }
    let mode = if beta == 0.0 { AccessMode::Write } else { AccessMode::ReadWrite };
    binary(ctx, ADD, src, dst, mode, ScalarArgs::new().with_scalars(&[alpha, beta]))
}

pub fn add(ctx: &NodeContext, alpha: f64, src: &Tensor, beta: f64, dst: &Tensor) -> TesseraResult<()> {
    complete(ctx, add_async(ctx, alpha, src, beta, dst))
}

/// `dst = hypot(alpha * src, beta * dst)`. Submits nothing when
/// `alpha == 0` and `beta == 1`.
pub fn hypot_async(ctx: &NodeContext, alpha: f64, src: &Tensor, beta: f64, dst: &Tensor) -> TesseraResult<Batch> {
    check_same_layout(HYPOT, src, dst)?;
    if is_identity(alpha, beta) {
        return Ok(Batch::new(HYPOT));
    }
    let mode = if beta == 0.0 { AccessMode::Write } else { AccessMode::ReadWrite };
    binary(ctx, HYPOT, src, dst, mode, ScalarArgs::new().with_scalars(&[alpha, beta]))
}

pub fn hypot(ctx: &NodeContext, alpha: f64, src: &Tensor, beta: f64, dst: &Tensor) -> TesseraResult<()> {
    complete(ctx, hypot_async(ctx, alpha, src, beta, dst))
}

pub fn maximum_async(ctx: &NodeContext, src: &Tensor, dst: &Tensor) -> TesseraResult<Batch> {
    binary(ctx, MAXIMUM, src, dst, AccessMode::ReadWrite, ScalarArgs::new())
}

pub fn maximum(ctx: &NodeContext, src: &Tensor, dst: &Tensor) -> TesseraResult<()> {
    complete(ctx, maximum_async(ctx, src, dst))
}

pub fn gelutanh_async(ctx: &NodeContext, dst: &Tensor) -> TesseraResult<Batch> {
    unary(ctx, GELUTANH, dst, AccessMode::ReadWrite, ScalarArgs::new())
}

pub fn gelutanh(ctx: &NodeContext, dst: &Tensor) -> TesseraResult<()> {
    complete(ctx, gelutanh_async(ctx, dst))
}

pub fn copy_async(ctx: &NodeContext, src: &Tensor, dst: &Tensor) -> TesseraResult<Batch> {
    binary(ctx, COPY, src, dst, AccessMode::Write, ScalarArgs::new())
}

pub fn copy(ctx: &NodeContext, src: &Tensor, dst: &Tensor) -> TesseraResult<()> {
    complete(ctx, copy_async(ctx, src, dst))
}

/// Fill `dst` with `mean + stddev * N(0, 1)`. Element values depend on
/// `seed` and the element's global index only.
pub fn randn_async(ctx: &NodeContext, dst: &Tensor, seed: u64, mean: f64, stddev: f64) -> TesseraResult<Batch> {
    let mut submitter = TileSubmitter::new(ctx, RANDN, dst, &[])?;
    let traits = dst.traits();
    for (index, coord) in dst.grid().coords().enumerate() {
        let tile = dst.tile_handle(index)?;
        let mut dims = vec![dst.ndim()];
        dims.extend(traits.tile_shape(&coord)?);
        dims.extend(traits.tile_start(&coord));
        dims.extend_from_slice(dst.shape());
        let args = ScalarArgs::new()
            .with_dims(&dims)
            .with_scalars(&[mean, stddev])
            .with_seed(seed);
        submitter.submit(tile, &[(tile, AccessMode::Write)], args)?;
        submitter.flush(tile)?;
    }
    Ok(submitter.finish())
}

pub fn randn(ctx: &NodeContext, dst: &Tensor, seed: u64, mean: f64, stddev: f64) -> TesseraResult<()> {
    complete(ctx, randn_async(ctx, dst, seed, mean, stddev))
}

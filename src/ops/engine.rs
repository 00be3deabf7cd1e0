//! Decomposition of tensor operations into per-tile tasks.
//!
//! Every rank walks the same destination tiles in the same order. For each
//! one it moves the contributing source tiles to the destination owner,
//! lets the owner alone submit the compute task, and invalidates the
//! cached copies of the destination tile everywhere.

use std::sync::Arc;

use tracing::debug;

use crate::codelet::{Codelet, ScalarArgs};
use crate::error::{TesseraError, TesseraResult};
use crate::runtime::{AccessMode, Batch, Handle, NodeContext};
use crate::tensor::{DType, Tensor};

/// Per-call submission helper collecting this rank's tasks into a batch
pub(crate) struct TileSubmitter<'a> {
    ctx: &'a NodeContext,
    op: &'static str,
    dtype: DType,
    codelet: Arc<Codelet>,
    batch: Batch,
}

impl<'a> TileSubmitter<'a> {
    /// Look up the codelet, make sure some device can run it and that every
    /// operand is live and distinct from `dst`, before anything is enqueued.
    pub fn new(ctx: &'a NodeContext, op: &'static str, dst: &Tensor, sources: &[&Tensor]) -> TesseraResult<Self> {
        let dtype = dst.dtype();
        let codelet = ctx.registry().lookup(op, dtype)?;
        ctx.select_device(&codelet)?;
        dst.check_live()?;
        for src in sources {
            src.check_live()?;
            if src.shares_tiles(dst) {
                return Err(TesseraError::InvalidInput(format!(
                    "{}: source and destination are the same tensor",
                    op
                )));
            }
        }
        Ok(Self {
            ctx,
            op,
            dtype,
            codelet,
            batch: Batch::new(op),
        })
    }

    /// Codelet of another operation for the same element type
    pub fn companion(&self, op: &'static str) -> TesseraResult<Arc<Codelet>> {
        let codelet = self.ctx.registry().lookup(op, self.dtype)?;
        self.ctx.select_device(&codelet)?;
        Ok(codelet)
    }

    /// Make `handle` resident at `to`, sourced from its owner
    pub fn transfer(&mut self, handle: &Handle, to: usize) -> TesseraResult<()> {
        if let Some(signal) = handle.transfer(self.ctx, to, handle.owner())? {
            self.batch.push_transfer(signal);
        }
        Ok(())
    }

    /// Submit the primary codelet if this rank owns `target`
    pub fn submit(&mut self, target: &Handle, accesses: &[(&Handle, AccessMode)], args: ScalarArgs) -> TesseraResult<()> {
        let codelet = self.codelet.clone();
        self.submit_with(&codelet, target, accesses, args)
    }

    pub fn submit_with(
        &mut self,
        codelet: &Codelet,
        target: &Handle,
        accesses: &[(&Handle, AccessMode)],
        args: ScalarArgs,
    ) -> TesseraResult<()> {
        if target.owner() != self.ctx.rank() {
            return Ok(());
        }
        let signal = self.ctx.submit(codelet, accesses, args)?;
        self.batch.push_task(signal);
        Ok(())
    }

    pub fn flush(&mut self, handle: &Handle) -> TesseraResult<()> {
        handle.flush(self.ctx)
    }

    pub fn finish(self) -> Batch {
        debug!(
            rank = self.ctx.rank(),
            op = self.op,
            tasks = self.batch.task_count(),
            transfers = self.batch.transfer_count(),
            "operation submitted"
        );
        self.batch
    }
}

/// `submit; wait_local; wait_all`
pub(crate) fn complete(ctx: &NodeContext, submitted: TesseraResult<Batch>) -> TesseraResult<()> {
    let _batch = submitted?;
    ctx.wait_local()?;
    ctx.wait_all()
}

pub(crate) fn check_dtype(op: &str, expected: &Tensor, other: &Tensor) -> TesseraResult<()> {
    if expected.dtype() != other.dtype() {
        return Err(TesseraError::TypeMismatch(format!(
            "{}: operands hold {} and {}",
            op,
            expected.dtype(),
            other.dtype()
        )));
    }
    Ok(())
}

/// Identical shape and basetile
pub(crate) fn check_same_layout(op: &str, src: &Tensor, dst: &Tensor) -> TesseraResult<()> {
    if src.shape() != dst.shape() {
        return Err(TesseraError::shape_error(
            &format!("{} operands of shape {:?}", op, dst.shape()),
            &format!("{:?}", src.shape()),
            None,
        ));
    }
    if src.basetile_shape() != dst.basetile_shape() {
        return Err(TesseraError::shape_error(
            &format!("{} operands with basetile {:?}", op, dst.basetile_shape()),
            &format!("{:?}", src.basetile_shape()),
            Some("retile one operand with copy_intersection"),
        ));
    }
    check_dtype(op, dst, src)
}

pub(crate) fn check_axis(op: &str, axis: usize, ndim: usize) -> TesseraResult<()> {
    if axis >= ndim {
        return Err(TesseraError::InvalidInput(format!(
            "{}: axis {} out of range for {} dimensions",
            op, axis, ndim
        )));
    }
    Ok(())
}

/// `reduced` must match `full` on every axis except `axis`, which it lacks.
/// `lead` extra leading axes of `reduced` are skipped.
pub(crate) fn check_sliced(op: &str, full: &Tensor, reduced: &Tensor, axis: usize, lead: usize) -> TesseraResult<()> {
    check_axis(op, axis, full.ndim())?;
    if reduced.ndim() + 1 != full.ndim() + lead {
        return Err(TesseraError::shape_error(
            &format!("{} operand with {} dimensions", op, full.ndim() + lead - 1),
            &format!("{} dimensions", reduced.ndim()),
            None,
        ));
    }
    let reduced_axes = (0..full.ndim()).filter(|&i| i != axis).zip(lead..);
    for (i, j) in reduced_axes {
        if full.shape()[i] != reduced.shape()[j] || full.basetile_shape()[i] != reduced.basetile_shape()[j] {
            return Err(TesseraError::shape_error(
                &format!(
                    "{} axis {} of extent {} and basetile {}",
                    op,
                    j,
                    full.shape()[i],
                    full.basetile_shape()[i]
                ),
                &format!(
                    "extent {} and basetile {}",
                    reduced.shape()[j],
                    reduced.basetile_shape()[j]
                ),
                None,
            ));
        }
    }
    check_dtype(op, full, reduced)
}

/// Tile coordinate of `reduced` matching a coordinate of `full`
pub(crate) fn reduced_coord(full_coord: &[usize], axis: usize, lead: usize) -> Vec<usize> {
    let mut coord = vec![0; lead];
    coord.extend(
        full_coord
            .iter()
            .enumerate()
            .filter(|&(i, _)| i != axis)
            .map(|(_, &c)| c),
    );
    coord
}

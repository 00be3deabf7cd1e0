//! Per-tile handles: buffer, residency and access tracking.
//!
//! Every rank builds its own `Handle` for each tile. All ranks apply the
//! same sequence of transfers and flushes, so their residency sets stay
//! identical without any extra communication, and the shared `tag` pairs
//! each send with its receive.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{TesseraError, TesseraResult};
use crate::tensor::storage::{shared_tile, SharedTile, TileData};
use crate::tensor::DType;
use super::executor::{PendingAccess, PendingTask, TaskBody};
use super::task::{AccessMode, TaskClass, TaskSignal, TileAccess};
use super::NodeContext;

#[derive(Default)]
struct AccessTracker {
    last_writer: Option<TaskSignal>,
    readers: Vec<TaskSignal>,
}

impl AccessTracker {
    /// Tasks an access in `mode` must wait for
    fn dependencies(&self, mode: AccessMode) -> Vec<TaskSignal> {
        let mut deps: Vec<TaskSignal> = self.last_writer.iter().cloned().collect();
        if mode.is_write() {
            deps.extend(self.readers.iter().cloned());
        }
        deps
    }

    fn record(&mut self, mode: AccessMode, signal: &TaskSignal) {
        if mode.is_write() {
            self.last_writer = Some(signal.clone());
            self.readers.clear();
        } else {
            self.readers.retain(|reader| !reader.is_finished());
            self.readers.push(signal.clone());
        }
    }
}

struct HandleState {
    buffer: Option<SharedTile>,
    residency: BTreeSet<usize>,
    tracker: AccessTracker,
    outstanding: usize,
    released: bool,
}

struct HandleInner {
    tag: u64,
    tile_index: usize,
    owner: usize,
    rank: usize,
    dtype: DType,
    nelems: usize,
    state: Mutex<HandleState>,
}

/// One tile of a tensor as seen from one rank
#[derive(Clone)]
pub struct Handle {
    inner: Arc<HandleInner>,
}

impl Handle {
    /// New handle resident only at `owner`. The owner allocates a zeroed
    /// buffer; other ranks start without one.
    pub fn new(tag: u64, tile_index: usize, owner: usize, rank: usize, dtype: DType, nelems: usize) -> Self {
        let buffer = (owner == rank).then(|| shared_tile(TileData::zeros(dtype, nelems)));
        Self {
            inner: Arc::new(HandleInner {
                tag,
                tile_index,
                owner,
                rank,
                dtype,
                nelems,
                state: Mutex::new(HandleState {
                    buffer,
                    residency: BTreeSet::from([owner]),
                    tracker: AccessTracker::default(),
                    outstanding: 0,
                    released: false,
                }),
            }),
        }
    }

    pub fn tag(&self) -> u64 {
        self.inner.tag
    }

    pub fn tile_index(&self) -> usize {
        self.inner.tile_index
    }

    pub fn owner(&self) -> usize {
        self.inner.owner
    }

    /// Rank this view of the handle lives on
    pub fn rank(&self) -> usize {
        self.inner.rank
    }

    pub fn is_local_owner(&self) -> bool {
        self.inner.owner == self.inner.rank
    }

    pub fn dtype(&self) -> DType {
        self.inner.dtype
    }

    pub fn nelems(&self) -> usize {
        self.inner.nelems
    }

    /// Ranks holding a valid copy
    pub fn residency(&self) -> Vec<usize> {
        self.inner.state.lock().residency.iter().copied().collect()
    }

    pub fn is_resident(&self, rank: usize) -> bool {
        self.inner.state.lock().residency.contains(&rank)
    }

    /// Submitted tasks on this rank that still reference the handle
    pub fn refcount(&self) -> usize {
        self.inner.state.lock().outstanding
    }

    pub fn is_released(&self) -> bool {
        self.inner.state.lock().released
    }

    pub fn same_handle(&self, other: &Handle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn describe(&self) -> String {
        format!("tile {} (tag {})", self.inner.tile_index, self.inner.tag)
    }

    fn check_live(&self, state: &HandleState) -> TesseraResult<()> {
        if state.released {
            return Err(TesseraError::UseAfterRelease(self.describe()));
        }
        Ok(())
    }

    /// Validate that a compute task on this rank may touch the handle.
    pub(crate) fn check_access(&self, mode: AccessMode) -> TesseraResult<()> {
        let state = self.inner.state.lock();
        self.check_live(&state)?;
        if mode.is_write() && !self.is_local_owner() {
            return Err(TesseraError::InvalidState(format!(
                "{} is owned by rank {}, rank {} cannot write it",
                self.describe(),
                self.inner.owner,
                self.inner.rank
            )));
        }
        if state.buffer.is_none() || !state.residency.contains(&self.inner.rank) {
            return Err(TesseraError::InvalidState(format!(
                "{} is not resident on rank {}",
                self.describe(),
                self.inner.rank
            )));
        }
        Ok(())
    }

    /// Record an access by `signal` and return the buffer together with
    /// the tasks it has to wait for.
    pub(crate) fn register_access(
        &self,
        mode: AccessMode,
        signal: &TaskSignal,
    ) -> TesseraResult<(SharedTile, Vec<TaskSignal>)> {
        let mut state = self.inner.state.lock();
        self.check_live(&state)?;
        let buffer = state.buffer.clone().ok_or_else(|| {
            TesseraError::InvalidState(format!("{} has no buffer on rank {}", self.describe(), self.inner.rank))
        })?;
        let deps = state.tracker.dependencies(mode);
        state.tracker.record(mode, signal);
        state.outstanding += 1;
        Ok((buffer, deps))
    }

    pub(crate) fn finish_access(&self) {
        let mut state = self.inner.state.lock();
        state.outstanding = state.outstanding.saturating_sub(1);
    }

    /// Block until every conflicting task finished, then hand out the
    /// buffer. The lock is released when the returned guard drops.
    pub fn acquire(&self, ctx: &NodeContext, mode: AccessMode) -> TesseraResult<TileAccess> {
        let (buffer, deps) = {
            let state = self.inner.state.lock();
            self.check_live(&state)?;
            let buffer = state.buffer.clone().ok_or_else(|| {
                TesseraError::InvalidState(format!(
                    "{} is not resident on rank {}",
                    self.describe(),
                    self.inner.rank
                ))
            })?;
            (buffer, state.tracker.dependencies(mode))
        };
        ctx.runtime().wait_signals(deps)?;
        Ok(match mode {
            AccessMode::Read => TileAccess::Read(buffer.read_arc()),
            AccessMode::Write | AccessMode::ReadWrite => TileAccess::Write(buffer.write_arc()),
        })
    }

    /// Make a copy resident at `to_rank`, sourced from `from_rank`.
    ///
    /// Every rank must make the same call. Only `from_rank` submits a send
    /// and only `to_rank` submits a receive; the other ranks just record
    /// the new residency. Returns the local transfer task, if any.
    pub fn transfer(&self, ctx: &NodeContext, to_rank: usize, from_rank: usize) -> TesseraResult<Option<TaskSignal>> {
        let mut state = self.inner.state.lock();
        self.check_live(&state)?;
        if to_rank == from_rank || state.residency.contains(&to_rank) {
            return Ok(None);
        }
        if !state.residency.contains(&from_rank) {
            return Err(TesseraError::InvalidState(format!(
                "{} has no valid copy on rank {} to transfer from",
                self.describe(),
                from_rank
            )));
        }
        state.residency.insert(to_rank);

        let rank = self.inner.rank;
        let (mode, body, label) = if rank == from_rank {
            let label = format!("send[{}->{} tag {}]", from_rank, to_rank, self.inner.tag);
            let body = TaskBody::Send {
                transport: ctx.transport().clone(),
                src: from_rank,
                dst: to_rank,
                tag: self.inner.tag,
            };
            (AccessMode::Read, body, label)
        } else if rank == to_rank {
            // Fresh replica; tasks still holding an older one keep it alive.
            state.buffer = Some(shared_tile(TileData::zeros(self.inner.dtype, self.inner.nelems)));
            let label = format!("recv[{}->{} tag {}]", from_rank, to_rank, self.inner.tag);
            let body = TaskBody::Recv {
                transport: ctx.transport().clone(),
                src: from_rank,
                dst: to_rank,
                tag: self.inner.tag,
            };
            (AccessMode::Write, body, label)
        } else {
            return Ok(None);
        };

        let buffer = state.buffer.clone().ok_or_else(|| {
            TesseraError::InvalidState(format!("{} has no buffer on rank {}", self.describe(), rank))
        })?;
        let (tx, signal) = ctx.runtime().new_signal(&label);
        let deps = state.tracker.dependencies(mode);
        state.tracker.record(mode, &signal);
        state.outstanding += 1;
        drop(state);

        debug!(rank, tile = self.inner.tile_index, tag = self.inner.tag, from = from_rank, to = to_rank, "transfer");
        ctx.runtime().launch(
            tx,
            signal.clone(),
            PendingTask {
                label,
                class: TaskClass::Transfer,
                deps,
                accesses: vec![PendingAccess {
                    handle: self.clone(),
                    buffer,
                    mode,
                }],
                body,
            },
        );
        Ok(Some(signal))
    }

    /// Invalidate every non-owner copy. Tasks already submitted against a
    /// dropped replica still see it.
    pub fn flush(&self, ctx: &NodeContext) -> TesseraResult<()> {
        let mut state = self.inner.state.lock();
        self.check_live(&state)?;
        state.residency.clear();
        state.residency.insert(self.inner.owner);
        if !self.is_local_owner() {
            state.buffer = None;
        }
        ctx.runtime().stats().flushed();
        Ok(())
    }

    /// Release the buffer. Fails while tasks referencing the handle are
    /// outstanding; any later access reports use after release.
    pub fn unregister(&self) -> TesseraResult<()> {
        let mut state = self.inner.state.lock();
        self.check_live(&state)?;
        if state.outstanding > 0 {
            return Err(TesseraError::InvalidState(format!(
                "{} still has {} outstanding task(s)",
                self.describe(),
                state.outstanding
            )));
        }
        state.released = true;
        state.buffer = None;
        state.residency.clear();
        state.tracker = AccessTracker::default();
        Ok(())
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Handle")
            .field("tag", &self.inner.tag)
            .field("tile_index", &self.inner.tile_index)
            .field("owner", &self.inner.owner)
            .field("rank", &self.inner.rank)
            .field("residency", &state.residency)
            .field("outstanding", &state.outstanding)
            .field("released", &state.released)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::task::TaskState;

    #[test]
    fn test_new_handle() {
        let owned = Handle::new(0, 3, 1, 1, DType::F32, 4);
        assert!(owned.is_local_owner());
        assert_eq!(owned.residency(), vec![1]);
        assert!(owned.check_access(AccessMode::Write).is_ok());

        let remote = Handle::new(0, 3, 1, 0, DType::F32, 4);
        assert!(!remote.is_local_owner());
        assert!(remote.is_resident(1));
        assert!(matches!(
            remote.check_access(AccessMode::Read),
            Err(TesseraError::InvalidState(_))
        ));
        assert!(matches!(
            remote.check_access(AccessMode::Write),
            Err(TesseraError::InvalidState(_))
        ));
    }

    #[test]
    fn test_dependency_tracking() {
        let handle = Handle::new(0, 0, 0, 0, DType::F64, 2);
        let (w1_tx, w1) = TaskSignal::channel(1, "w1");
        let (_, r1) = TaskSignal::channel(2, "r1");
        let (_, r2) = TaskSignal::channel(3, "r2");
        let (_, w2) = TaskSignal::channel(4, "w2");

        let (_, deps) = handle.register_access(AccessMode::Write, &w1).unwrap();
        assert!(deps.is_empty());
        let (_, deps) = handle.register_access(AccessMode::Read, &r1).unwrap();
        assert_eq!(deps.iter().map(TaskSignal::id).collect::<Vec<_>>(), vec![1]);
        let (_, deps) = handle.register_access(AccessMode::Read, &r2).unwrap();
        assert_eq!(deps.iter().map(TaskSignal::id).collect::<Vec<_>>(), vec![1]);
        let (_, deps) = handle.register_access(AccessMode::ReadWrite, &w2).unwrap();
        assert_eq!(deps.iter().map(TaskSignal::id).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(handle.refcount(), 4);

        w1_tx.send_replace(TaskState::Completed);
        handle.finish_access();
        assert_eq!(handle.refcount(), 3);
    }

    #[test]
    fn test_unregister() {
        let handle = Handle::new(0, 0, 0, 0, DType::F32, 1);
        let (_, signal) = TaskSignal::channel(1, "fill");
        handle.register_access(AccessMode::Write, &signal).unwrap();
        assert!(matches!(handle.unregister(), Err(TesseraError::InvalidState(_))));
        handle.finish_access();
        handle.unregister().unwrap();
        assert!(handle.is_released());
        assert!(matches!(
            handle.check_access(AccessMode::Read),
            Err(TesseraError::UseAfterRelease(_))
        ));
        assert!(matches!(handle.unregister(), Err(TesseraError::UseAfterRelease(_))));
    }

    #[test]
    fn test_same_handle() {
        let a = Handle::new(0, 0, 0, 0, DType::F32, 1);
        let b = Handle::new(0, 0, 0, 0, DType::F32, 1);
        assert!(a.same_handle(&a.clone()));
        assert!(!a.same_handle(&b));
    }
}

//! Task states, completion signals and batch tokens

use std::fmt;
use std::sync::Arc;

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::RawRwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::{TesseraError, TesseraResult};
use crate::tensor::storage::TileData;
use crate::tensor::Element;
use super::NodeContext;

/// How a task touches a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessMode {
    Read,
    Write,
    ReadWrite,
}

impl AccessMode {
    pub const fn is_write(&self) -> bool {
        matches!(self, AccessMode::Write | AccessMode::ReadWrite)
    }
}

/// `queued -> running -> completed | failed`
#[derive(Debug, Clone, PartialEq)]
pub enum TaskState {
    Queued,
    Running,
    Completed,
    Failed(TesseraError),
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed(_))
    }
}

/// Whether a task counts towards `wait_local` or only `wait_all`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskClass {
    Compute,
    Transfer,
}

/// Cloneable view of a submitted task's state
#[derive(Clone)]
pub struct TaskSignal {
    id: u64,
    label: Arc<str>,
    state: watch::Receiver<TaskState>,
}

impl TaskSignal {
    pub(crate) fn channel(id: u64, label: &str) -> (watch::Sender<TaskState>, TaskSignal) {
        let (tx, rx) = watch::channel(TaskState::Queued);
        let signal = TaskSignal {
            id,
            label: Arc::from(label),
            state: rx,
        };
        (tx, signal)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn state(&self) -> TaskState {
        self.state.borrow().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.state.borrow().is_terminal()
    }

    pub fn is_completed(&self) -> bool {
        matches!(*self.state.borrow(), TaskState::Completed)
    }

    pub async fn wait(&self) -> TesseraResult<()> {
        let mut rx = self.state.clone();
        let state = rx
            .wait_for(|state| state.is_terminal())
            .await
            .map_err(|_| TesseraError::task_failure(&self.label, "task dropped before completion"))?
            .clone();
        match state {
            TaskState::Completed => Ok(()),
            TaskState::Failed(err) => Err(err),
            other => Err(TesseraError::InternalError(format!(
                "task {} woke in non-terminal state {:?}",
                self.label, other
            ))),
        }
    }
}

impl fmt::Debug for TaskSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSignal")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("state", &*self.state.borrow())
            .finish()
    }
}

/// Token for the tasks and transfers one operation call enqueued on this
/// node. Waiting consumes it.
#[must_use = "a batch does nothing unless waited on or dropped deliberately"]
#[derive(Debug)]
pub struct Batch {
    op: &'static str,
    tasks: Vec<TaskSignal>,
    transfers: Vec<TaskSignal>,
}

impl Batch {
    pub fn new(op: &'static str) -> Self {
        Self {
            op,
            tasks: Vec::new(),
            transfers: Vec::new(),
        }
    }

    pub fn op(&self) -> &'static str {
        self.op
    }

    pub(crate) fn push_task(&mut self, signal: TaskSignal) {
        self.tasks.push(signal);
    }

    pub(crate) fn push_transfer(&mut self, signal: TaskSignal) {
        self.transfers.push(signal);
    }

    /// Compute tasks this node submitted for the call
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Sends and receives this node took part in for the call
    pub fn transfer_count(&self) -> usize {
        self.transfers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty() && self.transfers.is_empty()
    }

    /// Block until every task and transfer of the batch finished. Reports the
    /// first failure in submission order.
    pub fn wait(self, ctx: &NodeContext) -> TesseraResult<()> {
        let signals: Vec<TaskSignal> = self.tasks.into_iter().chain(self.transfers).collect();
        ctx.runtime().wait_signals(signals)
    }
}

/// Scoped access to a tile buffer. Dropping it releases the lock.
pub enum TileAccess {
    Read(ArcRwLockReadGuard<RawRwLock, TileData>),
    Write(ArcRwLockWriteGuard<RawRwLock, TileData>),
}

impl TileAccess {
    pub fn mode(&self) -> AccessMode {
        match self {
            TileAccess::Read(_) => AccessMode::Read,
            TileAccess::Write(_) => AccessMode::ReadWrite,
        }
    }

    pub fn data(&self) -> &TileData {
        match self {
            TileAccess::Read(guard) => guard,
            TileAccess::Write(guard) => guard,
        }
    }

    pub fn data_mut(&mut self) -> TesseraResult<&mut TileData> {
        match self {
            TileAccess::Read(_) => Err(TesseraError::InvalidState(
                "buffer was acquired read-only".to_string(),
            )),
            TileAccess::Write(guard) => Ok(&mut **guard),
        }
    }

    pub fn as_slice<T: Element>(&self) -> TesseraResult<&[T]> {
        self.data().as_slice()
    }

    pub fn as_mut_slice<T: Element>(&mut self) -> TesseraResult<&mut [T]> {
        self.data_mut()?.as_mut_slice()
    }
}

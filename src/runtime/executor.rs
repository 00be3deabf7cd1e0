//! Tokio-backed task runtime of one node.
//!
//! Each task is an async future that awaits its prerequisites, takes a
//! device slot and runs the kernel on the blocking pool. Sends and
//! receives go through the transport instead of a device slot.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::{watch, Semaphore};
use tracing::{debug, warn};

use crate::codelet::{KernelFn, ScalarArgs};
use crate::config::RuntimeConfig;
use crate::distributed::{TransferMessage, Transport};
use crate::error::{TesseraError, TesseraResult};
use crate::tensor::storage::{SharedTile, TileData};
use crate::tensor::DeviceKind;
use super::handle::Handle;
use super::stats::RuntimeStats;
use super::task::{AccessMode, TaskClass, TaskSignal, TaskState, TileAccess};

pub(crate) struct PendingAccess {
    pub handle: Handle,
    pub buffer: SharedTile,
    pub mode: AccessMode,
}

pub(crate) enum TaskBody {
    Kernel {
        device: DeviceKind,
        entry: KernelFn,
        args: ScalarArgs,
    },
    Send {
        transport: Arc<dyn Transport>,
        src: usize,
        dst: usize,
        tag: u64,
    },
    Recv {
        transport: Arc<dyn Transport>,
        src: usize,
        dst: usize,
        tag: u64,
    },
}

pub(crate) struct PendingTask {
    pub label: String,
    pub class: TaskClass,
    pub deps: Vec<TaskSignal>,
    pub accesses: Vec<PendingAccess>,
    pub body: TaskBody,
}

/// Worker pool and bookkeeping for the tasks of one node
pub struct TaskRuntime {
    rank: usize,
    runtime: Runtime,
    cpu_slots: Arc<Semaphore>,
    accelerator_slots: Option<Arc<Semaphore>>,
    compute: Mutex<Vec<TaskSignal>>,
    transfers: Mutex<Vec<TaskSignal>>,
    next_id: AtomicU64,
    stats: Arc<RuntimeStats>,
}

impl TaskRuntime {
    pub fn new(rank: usize, config: &RuntimeConfig) -> TesseraResult<Self> {
        if config.cpu_workers == 0 {
            return Err(TesseraError::ConfigurationError(
                "at least one cpu worker is required".to_string(),
            ));
        }
        let runtime = Builder::new_multi_thread()
            .worker_threads(config.scheduler_threads.max(1))
            .thread_name(format!("tessera-rank{}", rank))
            .enable_all()
            .build()?;
        let accelerator_slots =
            (config.accelerator_workers > 0).then(|| Arc::new(Semaphore::new(config.accelerator_workers)));
        Ok(Self {
            rank,
            runtime,
            cpu_slots: Arc::new(Semaphore::new(config.cpu_workers)),
            accelerator_slots,
            compute: Mutex::new(Vec::new()),
            transfers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
            stats: Arc::new(RuntimeStats::new()),
        })
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn has_accelerator(&self) -> bool {
        self.accelerator_slots.is_some()
    }

    pub fn stats(&self) -> &Arc<RuntimeStats> {
        &self.stats
    }

    /// Compute tasks not yet waited for by a barrier. Completed ones are
    /// dropped as new tasks arrive; failed ones stay until a barrier reports
    /// them.
    pub fn pending_tasks(&self) -> usize {
        self.compute.lock().len()
    }

    pub fn pending_transfers(&self) -> usize {
        self.transfers.lock().len()
    }

    pub(crate) fn new_signal(&self, label: &str) -> (watch::Sender<TaskState>, TaskSignal) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        TaskSignal::channel(id, label)
    }

    /// Hand a registered task to the worker pool. Never blocks.
    pub(crate) fn launch(&self, tx: watch::Sender<TaskState>, signal: TaskSignal, task: PendingTask) {
        match task.class {
            TaskClass::Compute => {
                self.stats.task_submitted();
                track(&self.compute, signal);
            }
            TaskClass::Transfer => {
                if matches!(task.body, TaskBody::Send { .. }) {
                    self.stats.send_submitted();
                } else {
                    self.stats.receive_submitted();
                }
                track(&self.transfers, signal);
            }
        }
        let slots = match &task.body {
            TaskBody::Kernel {
                device: DeviceKind::Accelerator,
                ..
            } => self.accelerator_slots.clone(),
            TaskBody::Kernel { .. } => Some(self.cpu_slots.clone()),
            _ => None,
        };
        let stats = self.stats.clone();
        let rank = self.rank;
        self.runtime.spawn(async move {
            let PendingTask {
                label,
                class,
                deps,
                accesses,
                body,
            } = task;

            let mut prerequisites = Ok(());
            for dep in &deps {
                if let Err(err) = dep.wait().await {
                    prerequisites = Err(err);
                    break;
                }
            }
            tx.send_replace(TaskState::Running);

            let result = match body {
                TaskBody::Kernel { device, entry, args } => match prerequisites {
                    Ok(()) => run_kernel(&label, device, entry, args, &accesses, slots, &stats).await,
                    Err(err) => Err(err),
                },
                TaskBody::Send {
                    transport,
                    src,
                    dst,
                    tag,
                } => run_send(transport, src, dst, tag, &accesses, prerequisites).await,
                TaskBody::Recv {
                    transport,
                    src,
                    dst,
                    tag,
                } => run_recv(transport, src, dst, tag, &accesses, prerequisites).await,
            };

            for access in &accesses {
                access.handle.finish_access();
            }
            match result {
                Ok(()) => {
                    if class == TaskClass::Compute {
                        stats.task_completed();
                    }
                    debug!(rank, task = %label, "task completed");
                    tx.send_replace(TaskState::Completed);
                }
                Err(err) => {
                    if class == TaskClass::Compute {
                        stats.task_failed();
                    }
                    warn!(rank, task = %label, error = %err, "task failed");
                    tx.send_replace(TaskState::Failed(err));
                }
            }
        });
    }

    /// Run a future to completion on this node's runtime. Must not be
    /// called from inside a tokio runtime.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    /// Wait for every signal, reporting the first failure in order
    pub fn wait_signals(&self, signals: Vec<TaskSignal>) -> TesseraResult<()> {
        if signals.is_empty() {
            return Ok(());
        }
        self.block_on(async move {
            let mut first_error = None;
            for signal in &signals {
                if let Err(err) = signal.wait().await {
                    first_error.get_or_insert(err);
                }
            }
            first_error.map_or(Ok(()), Err)
        })
    }

    /// Block until every compute task submitted so far finished
    pub fn wait_local(&self) -> TesseraResult<()> {
        let signals = std::mem::take(&mut *self.compute.lock());
        self.wait_signals(signals)
    }

    /// Block until every compute task and transfer submitted so far finished
    pub fn wait_all(&self) -> TesseraResult<()> {
        let compute = self.wait_local();
        let signals = std::mem::take(&mut *self.transfers.lock());
        let transfers = self.wait_signals(signals);
        compute.and(transfers)
    }
}

fn track(list: &Mutex<Vec<TaskSignal>>, signal: TaskSignal) {
    let mut list = list.lock();
    list.retain(|s| !s.is_completed());
    list.push(signal);
}

async fn run_kernel(
    label: &str,
    device: DeviceKind,
    entry: KernelFn,
    args: ScalarArgs,
    accesses: &[PendingAccess],
    slots: Option<Arc<Semaphore>>,
    stats: &RuntimeStats,
) -> TesseraResult<()> {
    let slots = slots.ok_or_else(|| TesseraError::DeviceUnavailable(format!("no {} workers", device)))?;
    let _permit = slots
        .acquire_owned()
        .await
        .map_err(|_| TesseraError::task_failure(label, "worker pool closed"))?;
    let buffers: Vec<(SharedTile, AccessMode)> = accesses
        .iter()
        .map(|access| (access.buffer.clone(), access.mode))
        .collect();
    let started = Instant::now();
    let outcome = tokio::task::spawn_blocking(move || {
        let mut guards: Vec<TileAccess> = buffers
            .into_iter()
            .map(|(buffer, mode)| match mode {
                AccessMode::Read => TileAccess::Read(buffer.read_arc()),
                AccessMode::Write | AccessMode::ReadWrite => TileAccess::Write(buffer.write_arc()),
            })
            .collect();
        entry(&mut guards, &args)
    })
    .await;
    stats.kernel_executed(device, started.elapsed());
    match outcome {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err @ TesseraError::TaskFailure { .. })) => Err(err),
        Ok(Err(err)) => Err(TesseraError::task_failure(label, err.to_string())),
        Err(join) => Err(TesseraError::task_failure(label, format!("kernel panicked: {}", join))),
    }
}

async fn run_send(
    transport: Arc<dyn Transport>,
    src: usize,
    dst: usize,
    tag: u64,
    accesses: &[PendingAccess],
    prerequisites: TesseraResult<()>,
) -> TesseraResult<()> {
    let message = match &prerequisites {
        Ok(()) => {
            let buffer = single_buffer(accesses)?;
            let data = tokio::task::spawn_blocking(move || buffer.read().clone())
                .await
                .map_err(|e| TesseraError::TransferFailure(e.to_string()))?;
            TransferMessage::Data(data)
        }
        Err(err) => TransferMessage::Aborted(err.to_string()),
    };
    transport.send(src, dst, tag, message.encode()?).await?;
    prerequisites
}

async fn run_recv(
    transport: Arc<dyn Transport>,
    src: usize,
    dst: usize,
    tag: u64,
    accesses: &[PendingAccess],
    prerequisites: TesseraResult<()>,
) -> TesseraResult<()> {
    // Always consume the message so the channel stays in step.
    let payload = transport.receive(src, dst, tag).await?;
    prerequisites?;
    let data = match TransferMessage::decode(&payload)? {
        TransferMessage::Data(data) => data,
        TransferMessage::Aborted(reason) => {
            return Err(TesseraError::TransferFailure(format!(
                "rank {} aborted send of tag {}: {}",
                src, tag, reason
            )))
        }
    };
    let buffer = single_buffer(accesses)?;
    tokio::task::spawn_blocking(move || store_replica(&buffer, data))
        .await
        .map_err(|e| TesseraError::TransferFailure(e.to_string()))?
}

fn single_buffer(accesses: &[PendingAccess]) -> TesseraResult<SharedTile> {
    accesses
        .first()
        .map(|access| access.buffer.clone())
        .ok_or_else(|| TesseraError::InternalError("transfer without a buffer".to_string()))
}

fn store_replica(buffer: &SharedTile, data: TileData) -> TesseraResult<()> {
    let mut replica = buffer.write();
    if replica.dtype() != data.dtype() || replica.len() != data.len() {
        return Err(TesseraError::TransferFailure(format!(
            "received {} x {} for a {} x {} tile",
            data.len(),
            data.dtype(),
            replica.len(),
            replica.dtype()
        )));
    }
    *replica = data;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::DType;

    fn config() -> RuntimeConfig {
        RuntimeConfig {
            cpu_workers: 2,
            accelerator_workers: 0,
            scheduler_threads: 1,
        }
    }

    #[test]
    fn test_new_runtime() {
        let runtime = TaskRuntime::new(3, &config()).unwrap();
        assert_eq!(runtime.rank(), 3);
        assert!(!runtime.has_accelerator());
        assert!(TaskRuntime::new(
            0,
            &RuntimeConfig {
                cpu_workers: 0,
                ..config()
            }
        )
        .is_err());
    }

    #[test]
    fn test_store_replica_checks_layout() {
        let buffer = crate::tensor::storage::shared_tile(TileData::zeros(DType::F32, 2));
        assert!(store_replica(&buffer, TileData::F32(vec![1.0, 2.0])).is_ok());
        assert!(matches!(
            store_replica(&buffer, TileData::F64(vec![1.0, 2.0])),
            Err(TesseraError::TransferFailure(_))
        ));
        assert!(store_replica(&buffer, TileData::F32(vec![1.0])).is_err());
    }

    #[test]
    fn test_tracking_drops_completed() {
        let runtime = TaskRuntime::new(0, &config()).unwrap();
        let list = Mutex::new(Vec::new());
        let (done_tx, done) = runtime.new_signal("done");
        let (failed_tx, failed) = runtime.new_signal("failed");
        let (running_tx, running) = runtime.new_signal("running");
        track(&list, done);
        track(&list, failed);
        track(&list, running);
        done_tx.send_replace(TaskState::Completed);
        failed_tx.send_replace(TaskState::Failed(TesseraError::task_failure("failed", "boom")));
        running_tx.send_replace(TaskState::Running);
        let (_next_tx, next) = runtime.new_signal("next");
        track(&list, next);
        let labels: Vec<String> = list.lock().iter().map(|s| s.label().to_string()).collect();
        assert_eq!(labels, vec!["failed", "running", "next"]);
    }

    #[test]
    fn test_wait_reports_first_failure() {
        let runtime = TaskRuntime::new(0, &config()).unwrap();
        let (ok_tx, ok) = runtime.new_signal("a");
        let (bad_tx, bad) = runtime.new_signal("b");
        let (worse_tx, worse) = runtime.new_signal("c");
        ok_tx.send_replace(TaskState::Completed);
        bad_tx.send_replace(TaskState::Failed(TesseraError::task_failure("b", "first")));
        worse_tx.send_replace(TaskState::Failed(TesseraError::task_failure("c", "second")));
        assert_eq!(
            runtime.wait_signals(vec![ok, bad, worse]),
            Err(TesseraError::task_failure("b", "first"))
        );
    }
}

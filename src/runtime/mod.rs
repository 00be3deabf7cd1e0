//! Node contexts and the process group that hosts them.
//!
//! A [`ProcessGroup`] runs one [`NodeContext`] per rank. Client code is
//! written SPMD style: every rank creates the same tensors in the same
//! order and issues the same operations, and each rank only executes the
//! tasks for the tiles it owns.

pub mod executor;
pub mod handle;
pub mod stats;
pub mod task;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use crate::codelet::{Codelet, CodeletRegistry, ScalarArgs};
use crate::config::TesseraConfig;
use crate::distributed::{InProcessTransport, Transport};
use crate::error::{TesseraError, TesseraResult};
use crate::tensor::{DeviceKind, DeviceMask};
use executor::{PendingAccess, PendingTask, TaskBody};

pub use executor::TaskRuntime;
pub use handle::Handle;
pub use stats::{RuntimeStats, StatsSnapshot};
pub use task::{AccessMode, Batch, TaskClass, TaskSignal, TaskState, TileAccess};

/// Everything one rank needs to create tensors and submit work
pub struct NodeContext {
    rank: usize,
    world_size: usize,
    registry: Arc<CodeletRegistry>,
    transport: Arc<dyn Transport>,
    runtime: TaskRuntime,
    next_tag: AtomicU64,
}

impl NodeContext {
    pub fn new(
        rank: usize,
        config: &TesseraConfig,
        registry: Arc<CodeletRegistry>,
        transport: Arc<dyn Transport>,
    ) -> TesseraResult<Self> {
        let world_size = config.distributed.world_size;
        if rank >= world_size {
            return Err(TesseraError::IndexOutOfRange {
                index: rank,
                bound: world_size,
            });
        }
        let runtime = TaskRuntime::new(rank, &config.runtime)?;
        info!(rank, world_size, transport = transport.name(), "node context created");
        Ok(Self {
            rank,
            world_size,
            registry,
            transport,
            runtime,
            next_tag: AtomicU64::new(0),
        })
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn world_size(&self) -> usize {
        self.world_size
    }

    pub fn registry(&self) -> &Arc<CodeletRegistry> {
        &self.registry
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn runtime(&self) -> &TaskRuntime {
        &self.runtime
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.runtime.stats().snapshot()
    }

    /// Reserve `count` consecutive handle tags. Ranks that create tensors in
    /// the same order get the same tags.
    pub(crate) fn allocate_tags(&self, count: usize) -> u64 {
        self.next_tag.fetch_add(count as u64, Ordering::Relaxed)
    }

    /// Pick the device family for a submission of `codelet`
    pub fn select_device(&self, codelet: &Codelet) -> TesseraResult<DeviceKind> {
        let mask = self.registry.effective_mask(codelet);
        if mask.contains(DeviceKind::Accelerator) && codelet.has_accelerator() && self.runtime.has_accelerator() {
            return Ok(DeviceKind::Accelerator);
        }
        if mask.contains(DeviceKind::Cpu) {
            return Ok(DeviceKind::Cpu);
        }
        Err(TesseraError::DeviceUnavailable(format!(
            "no device for '{}' ({}) under mask {:#b}",
            codelet.name(),
            codelet.dtype(),
            mask.bits()
        )))
    }

    /// Submit one compute task. Dependencies on earlier tasks touching the
    /// same handles are derived from the declared access modes.
    pub fn submit(
        &self,
        codelet: &Codelet,
        accesses: &[(&Handle, AccessMode)],
        args: ScalarArgs,
    ) -> TesseraResult<TaskSignal> {
        for (i, (handle, mode)) in accesses.iter().enumerate() {
            if accesses[..i].iter().any(|(other, _)| other.same_handle(handle)) {
                return Err(TesseraError::InvalidInput(format!(
                    "task '{}' names tile {} twice",
                    codelet.name(),
                    handle.tile_index()
                )));
            }
            if handle.dtype() != codelet.dtype() {
                return Err(TesseraError::TypeMismatch(format!(
                    "codelet '{}' is {}, tile {} is {}",
                    codelet.name(),
                    codelet.dtype(),
                    handle.tile_index(),
                    handle.dtype()
                )));
            }
            handle.check_access(*mode)?;
        }
        let device = self.select_device(codelet)?;
        let entry = codelet.entry(device).ok_or_else(|| {
            TesseraError::DeviceUnavailable(format!("'{}' has no {} entry", codelet.name(), device))
        })?;

        let label = match accesses.last() {
            Some((handle, _)) => format!("{}[{}]", codelet.name(), handle.tile_index()),
            None => codelet.name().to_string(),
        };
        let (tx, signal) = self.runtime.new_signal(&label);
        let mut deps = Vec::new();
        let mut pending = Vec::with_capacity(accesses.len());
        for (handle, mode) in accesses {
            let (buffer, handle_deps) = handle.register_access(*mode, &signal)?;
            deps.extend(handle_deps);
            pending.push(PendingAccess {
                handle: (*handle).clone(),
                buffer,
                mode: *mode,
            });
        }
        debug!(rank = self.rank, task = %label, device = %device, deps = deps.len(), "submit");
        self.runtime.launch(
            tx,
            signal.clone(),
            PendingTask {
                label,
                class: TaskClass::Compute,
                deps,
                accesses: pending,
                body: TaskBody::Kernel { device, entry, args },
            },
        );
        Ok(signal)
    }

    pub fn wait_local(&self) -> TesseraResult<()> {
        self.runtime.wait_local()
    }

    pub fn wait_all(&self) -> TesseraResult<()> {
        self.runtime.wait_all()
    }

    pub fn restrict_devices(&self, mask: DeviceMask) {
        self.registry.restrict_devices(mask);
    }
}

impl Drop for NodeContext {
    fn drop(&mut self) {
        let stats = self.stats();
        info!(
            rank = self.rank,
            submitted = stats.tasks_submitted,
            failed = stats.tasks_failed,
            "node context shut down"
        );
    }
}

/// A fixed set of ranks sharing a transport
pub struct ProcessGroup {
    config: TesseraConfig,
    transport: Arc<dyn Transport>,
}

impl ProcessGroup {
    pub fn new(config: TesseraConfig) -> TesseraResult<Self> {
        let transport = Arc::new(InProcessTransport::new(config.distributed.world_size));
        Self::with_transport(config, transport)
    }

    pub fn with_transport(config: TesseraConfig, transport: Arc<dyn Transport>) -> TesseraResult<Self> {
        config.validate()?;
        Ok(Self { config, transport })
    }

    pub fn world_size(&self) -> usize {
        self.config.distributed.world_size
    }

    pub fn config(&self) -> &TesseraConfig {
        &self.config
    }

    pub fn context(&self, rank: usize, registry: Arc<CodeletRegistry>) -> TesseraResult<NodeContext> {
        NodeContext::new(rank, &self.config, registry, self.transport.clone())
    }

    /// Run `f` once per rank, each on its own thread, and collect the
    /// per-rank results in rank order. Outstanding work of every rank is
    /// waited for before the rank's context is dropped.
    ///
    /// `f` has to issue the same tensor creations and operations on every
    /// rank; a rank that diverges leaves its peers waiting on transfers.
    pub fn spmd<R, F>(&self, registry: Arc<CodeletRegistry>, f: F) -> TesseraResult<Vec<R>>
    where
        R: Send,
        F: Fn(&NodeContext) -> TesseraResult<R> + Sync,
    {
        let contexts = (0..self.world_size())
            .map(|rank| self.context(rank, registry.clone()))
            .collect::<TesseraResult<Vec<_>>>()?;
        info!(world_size = self.world_size(), transport = self.transport.name(), "spmd start");

        let outcomes: Vec<TesseraResult<R>> = std::thread::scope(|scope| {
            let workers: Vec<_> = contexts
                .iter()
                .map(|ctx| {
                    let f = &f;
                    scope.spawn(move || {
                        let result = f(ctx);
                        let drained = ctx.wait_all();
                        result.and_then(|value| drained.map(|()| value))
                    })
                })
                .collect();
            workers
                .into_iter()
                .enumerate()
                .map(|(rank, worker)| {
                    worker.join().unwrap_or_else(|_| {
                        Err(TesseraError::InternalError(format!("rank {} panicked", rank)))
                    })
                })
                .collect()
        });
        outcomes.into_iter().collect()
    }
}

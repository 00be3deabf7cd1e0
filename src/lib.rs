//! Tessera - distributed tile-based tensor execution
//!
//! Features:
//! - Tensors partitioned into a grid of tiles with a per-tile owner rank
//! - Asynchronous per-tile tasks with dependencies inferred from declared accesses
//! - Codelets with CPU and accelerator entries, selected per task
//! - Point-to-point tile transfers between ranks over a pluggable transport
//! - Element-wise, reduction, broadcast and redistribution operations

pub mod codelet;
pub mod config;
pub mod distributed;
pub mod error;
pub mod kernel;
pub mod ops;
pub mod runtime;
pub mod tensor;

use tracing::Level;

pub use codelet::{Codelet, CodeletRegistry, KernelFn, ScalarArgs};
pub use config::{ConfigBuilder, ConfigManager, TesseraConfig};
pub use distributed::{InProcessTransport, Transport};
pub use error::{TesseraError, TesseraResult};
pub use runtime::{AccessMode, Batch, Handle, NodeContext, ProcessGroup, TaskSignal, TaskState, TileAccess};
pub use tensor::{DType, DeviceKind, DeviceMask, Distribution, Tensor, TensorTraits};

/// Install the global `tracing` subscriber. Later calls are ignored.
pub fn init(logging: &config::LoggingConfig) {
    let level = if logging.verbose { Level::DEBUG } else { Level::INFO };
    if tracing_subscriber::fmt().with_max_level(level).try_init().is_ok() {
        tracing::info!(version = version(), "tessera initialized");
    }
}

/// Get the current library version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

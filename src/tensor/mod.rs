//! Tiled tensors: element types, tile buffers, tiling metadata and the
//! tile-to-rank distribution.

pub mod core;
pub mod devices;
pub mod distribution;
pub mod dtype;
pub mod grid;
pub mod storage;
pub mod traits;

pub use self::core::Tensor;
pub use devices::{DeviceKind, DeviceMask};
pub use distribution::Distribution;
pub use dtype::{DType, Element};
pub use grid::TileGrid;
pub use storage::{shared_tile, SharedTile, TileData};
pub use traits::{TensorTraits, TileTraits};

//! Element types and typed access to tile buffers

use std::fmt::{self, Debug, Display};

use half::f16;
use serde::{Deserialize, Serialize};

use super::storage::TileData;

/// Element types a tile buffer can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DType {
    F32,
    F64,
    F16,
}

impl DType {
    /// Get the size in bytes of this data type
    pub const fn size(&self) -> usize {
        match self {
            DType::F32 => 4,
            DType::F64 => 8,
            DType::F16 => 2,
        }
    }

    pub const fn name(&self) -> &'static str {
        match self {
            DType::F32 => "f32",
            DType::F64 => "f64",
            DType::F16 => "f16",
        }
    }

    pub fn all() -> [DType; 3] {
        [DType::F32, DType::F64, DType::F16]
    }
}

impl Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Anything that can be stored in a tile buffer
pub trait Element: Copy + Debug + PartialEq + Send + Sync + 'static {
    const DTYPE: DType;

    fn slice(data: &TileData) -> Option<&[Self]>;
    fn slice_mut(data: &mut TileData) -> Option<&mut [Self]>;
    fn into_data(values: Vec<Self>) -> TileData;
}

macro_rules! impl_element {
    ($ty:ty, $dtype:expr, $variant:ident) => {
        impl Element for $ty {
            const DTYPE: DType = $dtype;

            fn slice(data: &TileData) -> Option<&[Self]> {
                match data {
                    TileData::$variant(values) => Some(values),
                    _ => None,
                }
            }

            fn slice_mut(data: &mut TileData) -> Option<&mut [Self]> {
                match data {
                    TileData::$variant(values) => Some(values),
                    _ => None,
                }
            }

            fn into_data(values: Vec<Self>) -> TileData {
                TileData::$variant(values)
            }
        }
    };
}

impl_element!(f32, DType::F32, F32);
impl_element!(f64, DType::F64, F64);

// Storage only: no kernels are registered for half precision.
impl_element!(f16, DType::F16, F16);

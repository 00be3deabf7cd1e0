use std::sync::Arc;

use half::f16;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{TesseraError, TesseraResult};
use super::dtype::{DType, Element};

/// Contiguous element buffer backing one tile copy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TileData {
    F32(Vec<f32>),
    F64(Vec<f64>),
    F16(Vec<f16>),
}

impl TileData {
    pub fn zeros(dtype: DType, nelems: usize) -> Self {
        match dtype {
            DType::F32 => TileData::F32(vec![0.0; nelems]),
            DType::F64 => TileData::F64(vec![0.0; nelems]),
            DType::F16 => TileData::F16(vec![f16::ZERO; nelems]),
        }
    }

    pub fn dtype(&self) -> DType {
        match self {
            TileData::F32(_) => DType::F32,
            TileData::F64(_) => DType::F64,
            TileData::F16(_) => DType::F16,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TileData::F32(values) => values.len(),
            TileData::F64(values) => values.len(),
            TileData::F16(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn size_bytes(&self) -> usize {
        self.len() * self.dtype().size()
    }

    pub fn as_slice<T: Element>(&self) -> TesseraResult<&[T]> {
        let dtype = self.dtype();
        T::slice(self).ok_or_else(|| {
            TesseraError::TypeMismatch(format!("buffer holds {}, requested {}", dtype, T::DTYPE))
        })
    }

    pub fn as_mut_slice<T: Element>(&mut self) -> TesseraResult<&mut [T]> {
        let dtype = self.dtype();
        T::slice_mut(self).ok_or_else(|| {
            TesseraError::TypeMismatch(format!("buffer holds {}, requested {}", dtype, T::DTYPE))
        })
    }

    /// Wire encoding used by the transport
    pub fn encode(&self) -> TesseraResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> TesseraResult<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Shared, lockable tile buffer. The owner's copy is authoritative; other
/// ranks hold replicas created by transfers.
pub type SharedTile = Arc<RwLock<TileData>>;

pub fn shared_tile(data: TileData) -> SharedTile {
    Arc::new(RwLock::new(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeros() {
        let data = TileData::zeros(DType::F32, 6);
        assert_eq!(data.len(), 6);
        assert_eq!(data.size_bytes(), 24);
        assert_eq!(data.as_slice::<f32>().unwrap(), &[0.0; 6]);
    }

    #[test]
    fn test_type_mismatch() {
        let mut data = TileData::zeros(DType::F64, 2);
        assert!(matches!(data.as_slice::<f32>(), Err(TesseraError::TypeMismatch(_))));
        assert!(data.as_mut_slice::<f64>().is_ok());
    }

    #[test]
    fn test_wire_encoding() {
        let data = TileData::F64(vec![1.5, -2.25, 7.0]);
        let bytes = data.encode().unwrap();
        let decoded = TileData::decode(&bytes).unwrap();
        assert_eq!(decoded, data);
        assert!(TileData::decode(&bytes[..3]).is_err());
    }
}

//! Strided copy of a rectangular block between two tiles

use crate::codelet::ScalarArgs;
use crate::error::{TesseraError, TesseraResult};
use crate::runtime::TileAccess;
use crate::tensor::Element;
use super::{check_len, source_and_target};

/// Packed layout of a block copy: block shape, then shape and block start
/// of the source and destination tiles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockCopy {
    pub block: Vec<usize>,
    pub src_shape: Vec<usize>,
    pub src_start: Vec<usize>,
    pub dst_shape: Vec<usize>,
    pub dst_start: Vec<usize>,
}

impl BlockCopy {
    pub fn to_dims(&self) -> Vec<usize> {
        let mut dims = vec![self.block.len()];
        for part in [&self.block, &self.src_shape, &self.src_start, &self.dst_shape, &self.dst_start] {
            dims.extend_from_slice(part);
        }
        dims
    }

    pub fn from_dims(dims: &[usize]) -> TesseraResult<Self> {
        let ndim = *dims
            .first()
            .ok_or_else(|| TesseraError::InvalidInput("empty block copy layout".to_string()))?;
        if dims.len() != 1 + 5 * ndim {
            return Err(TesseraError::InvalidInput(format!(
                "block copy layout for {} axes has {} entries",
                ndim,
                dims.len()
            )));
        }
        let part = |i: usize| dims[1 + i * ndim..1 + (i + 1) * ndim].to_vec();
        Ok(Self {
            block: part(0),
            src_shape: part(1),
            src_start: part(2),
            dst_shape: part(3),
            dst_start: part(4),
        })
    }

    fn check(&self) -> TesseraResult<()> {
        for axis in 0..self.block.len() {
            if self.src_start[axis] + self.block[axis] > self.src_shape[axis]
                || self.dst_start[axis] + self.block[axis] > self.dst_shape[axis]
            {
                return Err(TesseraError::InvalidInput(format!(
                    "block {:?} does not fit along axis {}",
                    self.block, axis
                )));
            }
        }
        Ok(())
    }
}

fn offset(index: &[usize], start: &[usize], shape: &[usize]) -> usize {
    let mut offset = 0;
    let mut stride = 1;
    for ((&i, &s), &dim) in index.iter().zip(start).zip(shape) {
        offset += (i + s) * stride;
        stride *= dim;
    }
    offset
}

/// Copy the block described by the packed dims from source to destination
pub fn copy_intersection<T: Element>(accesses: &mut [TileAccess], args: &ScalarArgs) -> TesseraResult<()> {
    let layout = BlockCopy::from_dims(&args.dims)?;
    layout.check()?;
    let (src, dst) = source_and_target::<T>(accesses)?;
    check_len("src", src.len(), layout.src_shape.iter().product())?;
    check_len("dst", dst.len(), layout.dst_shape.iter().product())?;

    let count: usize = layout.block.iter().product();
    let mut index = vec![0usize; layout.block.len()];
    for _ in 0..count {
        dst[offset(&index, &layout.dst_start, &layout.dst_shape)] =
            src[offset(&index, &layout.src_start, &layout.src_shape)];
        for (axis, i) in index.iter_mut().enumerate() {
            *i += 1;
            if *i < layout.block[axis] {
                break;
            }
            *i = 0;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::testing::run;
    use crate::tensor::storage::TileData;

    #[test]
    fn test_layout_packing() {
        let layout = BlockCopy {
            block: vec![1, 2],
            src_shape: vec![3, 3],
            src_start: vec![2, 0],
            dst_shape: vec![2, 2],
            dst_start: vec![0, 0],
        };
        let dims = layout.to_dims();
        assert_eq!(dims.len(), 11);
        assert_eq!(BlockCopy::from_dims(&dims).unwrap(), layout);
        assert!(BlockCopy::from_dims(&dims[..10]).is_err());
    }

    #[test]
    fn test_block_copy() {
        // src 3x3 column-major 0..9, copy rows 1..3 of columns 1..3 into a
        // 2x2 destination.
        let layout = BlockCopy {
            block: vec![2, 2],
            src_shape: vec![3, 3],
            src_start: vec![1, 1],
            dst_shape: vec![2, 2],
            dst_start: vec![0, 0],
        };
        let src = TileData::F64((0..9).map(f64::from).collect());
        let out = run(vec![src, TileData::F64(vec![0.0; 4])], |a| {
            copy_intersection::<f64>(a, &ScalarArgs::new().with_dims(&layout.to_dims())).unwrap()
        });
        assert_eq!(out, TileData::F64(vec![4.0, 5.0, 7.0, 8.0]));
    }

    #[test]
    fn test_block_out_of_bounds() {
        let layout = BlockCopy {
            block: vec![2],
            src_shape: vec![2],
            src_start: vec![1],
            dst_shape: vec![2],
            dst_start: vec![0],
        };
        run(vec![TileData::F32(vec![1.0, 2.0]), TileData::F32(vec![0.0; 2])], |a| {
            assert!(copy_intersection::<f32>(a, &ScalarArgs::new().with_dims(&layout.to_dims())).is_err());
        });
    }
}

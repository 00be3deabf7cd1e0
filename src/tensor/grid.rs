//! Bijection between linear tile indices and tile coordinates.
//!
//! Linear order is column-major: the first axis varies fastest.

use serde::{Deserialize, Serialize};

use crate::error::{TesseraError, TesseraResult};

/// Shape of a tensor measured in tiles
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileGrid {
    shape: Vec<usize>,
    stride: Vec<usize>,
    tile_count: usize,
}

impl TileGrid {
    pub fn new(shape: Vec<usize>) -> TesseraResult<Self> {
        if let Some(axis) = shape.iter().position(|&d| d == 0) {
            return Err(TesseraError::InvalidInput(format!(
                "grid shape {:?} has an empty axis {}",
                shape, axis
            )));
        }
        let mut stride = Vec::with_capacity(shape.len());
        let mut tile_count = 1usize;
        for &dim in &shape {
            stride.push(tile_count);
            tile_count = tile_count.checked_mul(dim).ok_or_else(|| {
                TesseraError::InvalidInput(format!("grid shape {:?} overflows", shape))
            })?;
        }
        Ok(Self {
            shape,
            stride,
            tile_count,
        })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn tile_count(&self) -> usize {
        self.tile_count
    }

    pub fn linear_to_coord(&self, index: usize) -> TesseraResult<Vec<usize>> {
        if index >= self.tile_count {
            return Err(TesseraError::IndexOutOfRange {
                index,
                bound: self.tile_count,
            });
        }
        let mut rest = index;
        let coord = self
            .shape
            .iter()
            .map(|&dim| {
                let c = rest % dim;
                rest /= dim;
                c
            })
            .collect();
        Ok(coord)
    }

    pub fn coord_to_linear(&self, coord: &[usize]) -> TesseraResult<usize> {
        if coord.len() != self.ndim() {
            return Err(TesseraError::InvalidInput(format!(
                "coordinate {:?} has {} axes, grid has {}",
                coord,
                coord.len(),
                self.ndim()
            )));
        }
        let mut index = 0;
        for ((&c, &dim), &stride) in coord.iter().zip(&self.shape).zip(&self.stride) {
            if c >= dim {
                return Err(TesseraError::IndexOutOfRange { index: c, bound: dim });
            }
            index += c * stride;
        }
        Ok(index)
    }

    /// All coordinates in linear order
    pub fn coords(&self) -> impl Iterator<Item = Vec<usize>> + '_ {
        (0..self.tile_count).map(move |i| {
            let mut rest = i;
            self.shape
                .iter()
                .map(|&dim| {
                    let c = rest % dim;
                    rest /= dim;
                    c
                })
                .collect()
        })
    }
}

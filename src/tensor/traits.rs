//! Shape and tiling metadata for tiles and tensors. No data lives here.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use crate::error::{TesseraError, TesseraResult};
use super::grid::TileGrid;

/// Shape of a single tile with derived column-major strides
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileTraits {
    pub shape: Vec<usize>,
    pub stride: Vec<usize>,
    pub nelems: usize,
    /// `matrix_shape[i] = [prod(shape[..i]), prod(shape[i..])]`
    pub matrix_shape: Vec<[usize; 2]>,
}

impl TileTraits {
    pub fn new(shape: Vec<usize>) -> Self {
        let mut stride = Vec::with_capacity(shape.len());
        let mut nelems = 1usize;
        for &dim in &shape {
            stride.push(nelems);
            nelems *= dim;
        }
        let mut matrix_shape = Vec::with_capacity(shape.len() + 1);
        let mut leading = 1usize;
        for i in 0..=shape.len() {
            let trailing = if leading == 0 { 0 } else { nelems / leading };
            matrix_shape.push([leading, trailing]);
            if i < shape.len() {
                leading *= shape[i];
            }
        }
        Self {
            shape,
            stride,
            nelems,
            matrix_shape,
        }
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// View as `(m, k, n)` around `axis`: `m` elements before the axis,
    /// `k` along it and `n` after it.
    pub fn split_at_axis(&self, axis: usize) -> (usize, usize, usize) {
        let m = self.matrix_shape[axis][0];
        let k = self.shape[axis];
        let n = self.matrix_shape[axis + 1][1];
        (m, k, n)
    }
}

/// Tensor shape, tiling and the derived tile grid
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorTraits {
    shape: Vec<usize>,
    basetile_shape: Vec<usize>,
    leftover_shape: Vec<usize>,
    grid: TileGrid,
    nelems: usize,
}

impl TensorTraits {
    pub fn new(shape: Vec<usize>, basetile_shape: Vec<usize>) -> TesseraResult<Self> {
        if shape.len() != basetile_shape.len() {
            return Err(TesseraError::shape_error(
                &format!("basetile with {} axes", shape.len()),
                &format!("{:?}", basetile_shape),
                None,
            ));
        }
        for (axis, (&dim, &tile)) in shape.iter().zip(&basetile_shape).enumerate() {
            if dim == 0 || tile == 0 {
                return Err(TesseraError::InvalidInput(format!(
                    "axis {} has zero extent (shape {:?}, basetile {:?})",
                    axis, shape, basetile_shape
                )));
            }
        }
        let grid_shape: Vec<usize> = shape
            .iter()
            .zip(&basetile_shape)
            .map(|(&dim, &tile)| (dim + tile - 1) / tile)
            .collect();
        let leftover_shape = shape
            .iter()
            .zip(&basetile_shape)
            .zip(&grid_shape)
            .map(|((&dim, &tile), &tiles)| dim - (tiles - 1) * tile)
            .collect();
        let nelems = shape.iter().product();
        Ok(Self {
            grid: TileGrid::new(grid_shape)?,
            shape,
            basetile_shape,
            leftover_shape,
            nelems,
        })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn basetile_shape(&self) -> &[usize] {
        &self.basetile_shape
    }

    /// Shape of the trailing (possibly partial) tile along each axis
    pub fn leftover_shape(&self) -> &[usize] {
        &self.leftover_shape
    }

    pub fn grid(&self) -> &TileGrid {
        &self.grid
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn nelems(&self) -> usize {
        self.nelems
    }

    pub fn tile_shape(&self, coord: &[usize]) -> TesseraResult<Vec<usize>> {
        self.grid.coord_to_linear(coord)?;
        Ok(coord
            .iter()
            .enumerate()
            .map(|(axis, &c)| {
                if c + 1 == self.grid.shape()[axis] {
                    self.leftover_shape[axis]
                } else {
                    self.basetile_shape[axis]
                }
            })
            .collect())
    }

    /// Global index of the first element of the tile at `coord`
    pub fn tile_start(&self, coord: &[usize]) -> Vec<usize> {
        coord
            .iter()
            .zip(&self.basetile_shape)
            .map(|(&c, &tile)| c * tile)
            .collect()
    }

    pub fn tile_traits(&self, index: usize) -> TesseraResult<TileTraits> {
        let coord = self.grid.linear_to_coord(index)?;
        Ok(TileTraits::new(self.tile_shape(&coord)?))
    }
}

impl Display for TensorTraits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "shape={:?} basetile={:?} grid={:?}",
            self.shape,
            self.basetile_shape,
            self.grid.shape()
        )
    }
}

//! Deterministic assignment of tiles to owner ranks

use serde::{Deserialize, Serialize};

use crate::error::{TesseraError, TesseraResult};
use super::grid::TileGrid;

/// Tile-coordinate to rank mapping, fixed for the lifetime of a tensor.
///
/// Tensors built with equal parameters over equal grid shapes agree on the
/// owner of every coordinate, which is what co-located cross-tensor
/// operations rely on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Distribution {
    /// Every tile lives on one rank
    Single { rank: usize },
    /// Block-cyclic assignment over a virtual process grid:
    /// `(start_rank + linear(coord mod process_grid)) mod max_rank`
    BlockCyclic {
        process_grid: Vec<usize>,
        start_rank: usize,
        max_rank: usize,
    },
    /// Explicit rank per tile, indexed by the column-major linear index
    Explicit { grid_shape: Vec<usize>, ranks: Vec<usize> },
}

impl Distribution {
    pub fn single(rank: usize) -> Self {
        Distribution::Single { rank }
    }

    pub fn block_cyclic(process_grid: Vec<usize>, start_rank: usize, max_rank: usize) -> TesseraResult<Self> {
        if process_grid.iter().any(|&p| p == 0) {
            return Err(TesseraError::InvalidInput(format!(
                "process grid {:?} has an empty axis",
                process_grid
            )));
        }
        if max_rank == 0 {
            return Err(TesseraError::InvalidInput("max_rank must be positive".to_string()));
        }
        Ok(Distribution::BlockCyclic {
            process_grid,
            start_rank,
            max_rank,
        })
    }

    pub fn explicit(grid_shape: Vec<usize>, ranks: Vec<usize>) -> TesseraResult<Self> {
        let grid = TileGrid::new(grid_shape.clone())?;
        if ranks.len() != grid.tile_count() {
            return Err(TesseraError::InvalidInput(format!(
                "{} ranks given for {} tiles",
                ranks.len(),
                grid.tile_count()
            )));
        }
        Ok(Distribution::Explicit { grid_shape, ranks })
    }

    /// Tile `i` goes to rank `i % world_size`
    pub fn round_robin(grid_shape: Vec<usize>, world_size: usize) -> TesseraResult<Self> {
        if world_size == 0 {
            return Err(TesseraError::InvalidInput("world size must be positive".to_string()));
        }
        let count = TileGrid::new(grid_shape.clone())?.tile_count();
        Self::explicit(grid_shape, (0..count).map(|i| i % world_size).collect())
    }

    pub fn owner_of(&self, coord: &[usize]) -> TesseraResult<usize> {
        match self {
            Distribution::Single { rank } => Ok(*rank),
            Distribution::BlockCyclic {
                process_grid,
                start_rank,
                max_rank,
            } => {
                if process_grid.len() != coord.len() {
                    return Err(TesseraError::InvalidInput(format!(
                        "process grid {:?} does not match coordinate {:?}",
                        process_grid, coord
                    )));
                }
                let mut linear = 0;
                let mut stride = 1;
                for (&c, &p) in coord.iter().zip(process_grid) {
                    linear += (c % p) * stride;
                    stride *= p;
                }
                Ok((start_rank + linear) % max_rank)
            }
            Distribution::Explicit { grid_shape, ranks } => {
                let grid = TileGrid::new(grid_shape.clone())?;
                Ok(ranks[grid.coord_to_linear(coord)?])
            }
        }
    }

    /// Owner of every tile of `grid`, in linear order. Fails if any owner is
    /// outside `[0, world_size)`.
    pub fn ranks(&self, grid: &TileGrid, world_size: usize) -> TesseraResult<Vec<usize>> {
        if let Distribution::Explicit { grid_shape, .. } = self {
            if grid_shape.as_slice() != grid.shape() {
                return Err(TesseraError::shape_error(
                    &format!("grid {:?}", grid_shape),
                    &format!("grid {:?}", grid.shape()),
                    None,
                ));
            }
        }
        grid.coords()
            .map(|coord| {
                let rank = self.owner_of(&coord)?;
                if rank >= world_size {
                    return Err(TesseraError::IndexOutOfRange {
                        index: rank,
                        bound: world_size,
                    });
                }
                Ok(rank)
            })
            .collect()
    }
}

//! Distributed tensor: tiling metadata plus one handle per tile

use std::fmt::{self, Display};

use tracing::debug;

use crate::error::{TesseraError, TesseraResult};
use crate::runtime::{AccessMode, Batch, Handle, NodeContext};
use super::distribution::Distribution;
use super::dtype::{DType, Element};
use super::grid::TileGrid;
use super::traits::{TensorTraits, TileTraits};

/// A tensor as seen from one rank.
///
/// Tile `i` of the tensor is `tiles[i]`; handles never point back at the
/// tensor. Every rank constructs the same tensors in the same order so
/// that handle tags agree across ranks.
pub struct Tensor {
    traits: TensorTraits,
    dtype: DType,
    distribution: Distribution,
    owners: Vec<usize>,
    tiles: Vec<Handle>,
    rank: usize,
}

impl Tensor {
    pub fn new(
        ctx: &NodeContext,
        traits: TensorTraits,
        dtype: DType,
        distribution: &Distribution,
    ) -> TesseraResult<Self> {
        let owners = distribution.ranks(traits.grid(), ctx.world_size())?;
        let first_tag = ctx.allocate_tags(owners.len());
        let tiles = owners
            .iter()
            .enumerate()
            .map(|(index, &owner)| {
                let nelems = traits.tile_traits(index)?.nelems;
                Ok(Handle::new(first_tag + index as u64, index, owner, ctx.rank(), dtype, nelems))
            })
            .collect::<TesseraResult<Vec<_>>>()?;
        debug!(rank = ctx.rank(), %traits, %dtype, first_tag, "tensor created");
        Ok(Self {
            traits,
            dtype,
            distribution: distribution.clone(),
            owners,
            tiles,
            rank: ctx.rank(),
        })
    }

    pub fn from_shape(
        ctx: &NodeContext,
        shape: &[usize],
        basetile_shape: &[usize],
        dtype: DType,
        distribution: &Distribution,
    ) -> TesseraResult<Self> {
        let traits = TensorTraits::new(shape.to_vec(), basetile_shape.to_vec())?;
        Self::new(ctx, traits, dtype, distribution)
    }

    pub fn traits(&self) -> &TensorTraits {
        &self.traits
    }

    pub fn shape(&self) -> &[usize] {
        self.traits.shape()
    }

    pub fn basetile_shape(&self) -> &[usize] {
        self.traits.basetile_shape()
    }

    pub fn grid(&self) -> &TileGrid {
        self.traits.grid()
    }

    pub fn ndim(&self) -> usize {
        self.traits.ndim()
    }

    pub fn nelems(&self) -> usize {
        self.traits.nelems()
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn distribution(&self) -> &Distribution {
        &self.distribution
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    pub fn tiles(&self) -> &[Handle] {
        &self.tiles
    }

    pub fn tile_handle(&self, index: usize) -> TesseraResult<&Handle> {
        self.tiles.get(index).ok_or(TesseraError::IndexOutOfRange {
            index,
            bound: self.tiles.len(),
        })
    }

    pub fn tile_owner(&self, index: usize) -> TesseraResult<usize> {
        self.owners.get(index).copied().ok_or(TesseraError::IndexOutOfRange {
            index,
            bound: self.owners.len(),
        })
    }

    pub fn tile_traits(&self, index: usize) -> TesseraResult<TileTraits> {
        self.traits.tile_traits(index)
    }

    /// Fails with `UseAfterRelease` if any tile was unregistered
    pub fn check_live(&self) -> TesseraResult<()> {
        match self.tiles.iter().position(Handle::is_released) {
            Some(index) => Err(TesseraError::UseAfterRelease(format!("tile {}", index))),
            None => Ok(()),
        }
    }

    /// Tensors never share handles, so comparing the first tile suffices.
    pub(crate) fn shares_tiles(&self, other: &Tensor) -> bool {
        match (self.tiles.first(), other.tiles.first()) {
            (Some(a), Some(b)) => a.same_handle(b),
            _ => false,
        }
    }

    /// Indices of the tiles this rank owns
    pub fn local_tiles(&self) -> impl Iterator<Item = usize> + '_ {
        self.owners
            .iter()
            .enumerate()
            .filter(move |&(_, &owner)| owner == self.rank)
            .map(|(index, _)| index)
    }

    /// Overwrite tile `index` with `values` (column-major within the tile).
    ///
    /// Called on every rank: the owner writes, and every rank invalidates
    /// its cached copy.
    pub fn write_tile<T: Element>(&self, ctx: &NodeContext, index: usize, values: &[T]) -> TesseraResult<()> {
        let handle = self.tile_handle(index)?;
        if T::DTYPE != self.dtype {
            return Err(TesseraError::TypeMismatch(format!(
                "tensor holds {}, got {} values",
                self.dtype,
                T::DTYPE
            )));
        }
        if values.len() != handle.nelems() {
            return Err(TesseraError::shape_error(
                &format!("{} elements for tile {}", handle.nelems(), index),
                &values.len().to_string(),
                None,
            ));
        }
        if handle.is_local_owner() {
            let mut access = handle.acquire(ctx, AccessMode::Write)?;
            access.as_mut_slice::<T>()?.copy_from_slice(values);
        }
        handle.flush(ctx)
    }

    /// Copy of tile `index` as held by this rank. Waits for pending writes;
    /// fails if the rank holds no valid copy.
    pub fn read_tile<T: Element>(&self, ctx: &NodeContext, index: usize) -> TesseraResult<Vec<T>> {
        let handle = self.tile_handle(index)?;
        if handle.is_released() {
            return Err(TesseraError::UseAfterRelease(format!("tile {}", index)));
        }
        if !handle.is_resident(ctx.rank()) {
            return Err(TesseraError::InvalidState(format!(
                "tile {} is not resident on rank {}",
                index,
                ctx.rank()
            )));
        }
        let access = handle.acquire(ctx, AccessMode::Read)?;
        Ok(access.as_slice::<T>()?.to_vec())
    }

    /// Make every tile resident on every rank. Called on every rank.
    pub fn replicate(&self, ctx: &NodeContext) -> TesseraResult<Batch> {
        let mut batch = Batch::new("replicate");
        for handle in &self.tiles {
            for to in 0..ctx.world_size() {
                if let Some(signal) = handle.transfer(ctx, to, handle.owner())? {
                    batch.push_transfer(signal);
                }
            }
        }
        Ok(batch)
    }

    /// Release every tile buffer. Fails on the first tile that still has
    /// outstanding tasks.
    pub fn unregister(&self) -> TesseraResult<()> {
        for handle in &self.tiles {
            if !handle.is_released() {
                handle.unregister()?;
            }
        }
        Ok(())
    }
}

impl Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tensor({}, dtype={})", self.traits, self.dtype)
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("traits", &self.traits)
            .field("dtype", &self.dtype)
            .field("distribution", &self.distribution)
            .field("rank", &self.rank)
            .finish()
    }
}

//! Reference CPU kernels over single tiles.
//!
//! Buffers are column-major. Axis kernels view a tile as `[m, k, n]` with
//! `k` the extent of the reduced or broadcast axis.

pub mod broadcast;
pub mod copy;
pub mod elementwise;
pub mod random;
pub mod reduction;

use num_traits::{Float, FromPrimitive};

use crate::error::{TesseraError, TesseraResult};
use crate::runtime::TileAccess;
use crate::tensor::Element;

/// Element types the arithmetic kernels are instantiated for
pub trait KernelFloat: Element + Float + FromPrimitive {}

impl<T: Element + Float + FromPrimitive> KernelFloat for T {}

/// Convert a host scalar argument to the kernel's element type
pub(crate) fn cast<T: FromPrimitive>(value: f64) -> TesseraResult<T> {
    T::from_f64(value)
        .ok_or_else(|| TesseraError::InvalidInput(format!("scalar {} is not representable", value)))
}

fn arity_error(expected: usize, got: usize) -> TesseraError {
    TesseraError::InvalidInput(format!("kernel expects {} buffer(s), got {}", expected, got))
}

pub(crate) fn single<T: Element>(accesses: &mut [TileAccess]) -> TesseraResult<&mut [T]> {
    match accesses {
        [dst] => dst.as_mut_slice(),
        _ => Err(arity_error(1, accesses.len())),
    }
}

pub(crate) fn source_and_target<T: Element>(
    accesses: &mut [TileAccess],
) -> TesseraResult<(&[T], &mut [T])> {
    match accesses {
        [src, dst] => Ok((src.as_slice()?, dst.as_mut_slice()?)),
        _ => Err(arity_error(2, accesses.len())),
    }
}

pub(crate) fn two_sources_and_target<T: Element>(
    accesses: &mut [TileAccess],
) -> TesseraResult<(&[T], &[T], &mut [T])> {
    match accesses {
        [first, second, dst] => Ok((first.as_slice()?, second.as_slice()?, dst.as_mut_slice()?)),
        _ => Err(arity_error(3, accesses.len())),
    }
}

pub(crate) fn check_len(what: &str, got: usize, expected: usize) -> TesseraResult<()> {
    if got != expected {
        return Err(TesseraError::InvalidInput(format!(
            "{} buffer holds {} elements, expected {}",
            what, got, expected
        )));
    }
    Ok(())
}

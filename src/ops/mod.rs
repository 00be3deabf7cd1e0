//! Tensor-level operations.
//!
//! Every operation must be called by all ranks with the same arguments. The
//! `*_async` forms return this rank's [`Batch`](crate::runtime::Batch)
//! without waiting; the plain forms also wait for local tasks and
//! outstanding transfers.
//!
//! A destination tensor cannot also be passed as a source; such calls fail
//! with `InvalidInput`. Operands with unregistered tiles fail with
//! `UseAfterRelease`. Both checks run before any task is submitted.

pub mod broadcast;
pub mod copy;
pub mod elementwise;
pub(crate) mod engine;
pub mod reduction;

pub use broadcast::{add_slice, add_slice_async, biasprod, biasprod_async};
pub use copy::{copy_intersection, copy_intersection_async, gather, gather_async, scatter, scatter_async};
pub use elementwise::{
    add, add_async, add_scalar, add_scalar_async, clear, clear_async, copy, copy_async, fill, fill_async, gelutanh,
    gelutanh_async, hypot, hypot_async, maximum, maximum_async, randn, randn_async,
};
pub use reduction::{normalize, normalize_async, sumnorm, sumnorm_async};

//! Built-in codelets for `f32` and `f64`

use tracing::info;

use crate::error::TesseraResult;
use crate::kernel::{broadcast, copy, elementwise, random, reduction};
use crate::tensor::DType;
use super::{CodeletRegistry, KernelFn};

pub const FILL: &str = "fill";
pub const CLEAR: &str = "clear";
pub const ADD_SCALAR: &str = "add_scalar";
pub const ADD: &str = "add";
pub const HYPOT: &str = "hypot";
pub const MAXIMUM: &str = "maximum";
pub const GELUTANH: &str = "gelutanh";
pub const COPY: &str = "copy";
pub const RANDN: &str = "randn";
pub const SUMNORM: &str = "sumnorm";
pub const NORMALIZE: &str = "normalize";
pub const BIASPROD: &str = "biasprod";
pub const ADD_SLICE: &str = "add_slice";
pub const COPY_INTERSECTION: &str = "copy_intersection";

pub const ALL_OPS: [&str; 14] = [
    FILL,
    CLEAR,
    ADD_SCALAR,
    ADD,
    HYPOT,
    MAXIMUM,
    GELUTANH,
    COPY,
    RANDN,
    SUMNORM,
    NORMALIZE,
    BIASPROD,
    ADD_SLICE,
    COPY_INTERSECTION,
];

macro_rules! kernel_table {
    ($ty:ty) => {
        [
            (FILL, elementwise::fill::<$ty> as KernelFn),
            (CLEAR, elementwise::clear::<$ty> as KernelFn),
            (ADD_SCALAR, elementwise::add_scalar::<$ty> as KernelFn),
            (ADD, elementwise::add::<$ty> as KernelFn),
            (HYPOT, elementwise::hypot::<$ty> as KernelFn),
            (MAXIMUM, elementwise::maximum::<$ty> as KernelFn),
            (GELUTANH, elementwise::gelutanh::<$ty> as KernelFn),
            (COPY, elementwise::copy::<$ty> as KernelFn),
            (RANDN, random::randn::<$ty> as KernelFn),
            (SUMNORM, reduction::sumnorm::<$ty> as KernelFn),
            (NORMALIZE, reduction::normalize::<$ty> as KernelFn),
            (BIASPROD, broadcast::biasprod::<$ty> as KernelFn),
            (ADD_SLICE, broadcast::add_slice::<$ty> as KernelFn),
            (COPY_INTERSECTION, copy::copy_intersection::<$ty> as KernelFn),
        ]
    };
}

/// Register the CPU entry of every built-in operation for both float types
pub fn register_all(registry: &CodeletRegistry) -> TesseraResult<()> {
    let tables: [(DType, [(&str, KernelFn); 14]); 2] =
        [(DType::F32, kernel_table!(f32)), (DType::F64, kernel_table!(f64))];
    for (dtype, table) in tables {
        for (op, kernel) in table {
            registry.register_kernels(op, dtype, kernel, None)?;
        }
    }
    info!(codelets = registry.len(), "built-in codelets registered");
    Ok(())
}

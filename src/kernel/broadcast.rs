use crate::codelet::ScalarArgs;
use crate::error::TesseraResult;
use crate::runtime::TileAccess;
use super::{cast, check_len, source_and_target, KernelFloat};

/// `dst[i0, i1, i2] *= src[i0, i2]` for a `[m, k, n]` destination.
///
/// Dims: `[m, n, k]`
pub fn biasprod<T: KernelFloat>(accesses: &mut [TileAccess], args: &ScalarArgs) -> TesseraResult<()> {
    let (m, n, k) = (args.dim(0)?, args.dim(1)?, args.dim(2)?);
    let (src, dst) = source_and_target::<T>(accesses)?;
    check_len("src", src.len(), m * n)?;
    check_len("dst", dst.len(), m * k * n)?;
    for i2 in 0..n {
        for i1 in 0..k {
            for i0 in 0..m {
                let d = &mut dst[i0 + m * (i1 + k * i2)];
                *d = *d * src[i0 + m * i2];
            }
        }
    }
    Ok(())
}

/// `dst[i0, i1, i2] = alpha * src[i0, i2] + beta * dst[i0, i1, i2]`
///
/// Dims: `[m, n, k]`. Scalars: `[alpha, beta]`.
pub fn add_slice<T: KernelFloat>(accesses: &mut [TileAccess], args: &ScalarArgs) -> TesseraResult<()> {
    let (m, n, k) = (args.dim(0)?, args.dim(1)?, args.dim(2)?);
    let alpha = cast::<T>(args.scalar(0)?)?;
    let beta = cast::<T>(args.scalar(1)?)?;
    let (src, dst) = source_and_target::<T>(accesses)?;
    check_len("src", src.len(), m * n)?;
    check_len("dst", dst.len(), m * k * n)?;
    let zero = T::zero();
    for i2 in 0..n {
        for i1 in 0..k {
            for i0 in 0..m {
                let s = alpha * src[i0 + m * i2];
                let d = &mut dst[i0 + m * (i1 + k * i2)];
                *d = if beta == zero { s } else { s + beta * *d };
            }
        }
    }
    Ok(())
}

//! Numerics module - scalar bound, padded storage and dense LU helpers.

mod aligned;
mod linalg;

pub use aligned::{aligned_size, AlignedRows, SIMD_ALIGNMENT_BYTES};
pub use linalg::{identity_deviation, random_matrix, LuWorkspace, Sign};

use nalgebra::RealField;

/// Floating-point scalar the kernels are generic over (`f32` or `f64`).
pub trait Real: RealField + Copy {}

impl<T: RealField + Copy> Real for T {}

/// Convert an `f64` literal into the working precision.
#[inline]
pub fn real<T: Real>(value: f64) -> T {
    nalgebra::convert(value)
}

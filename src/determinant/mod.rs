//! Determinant module - incremental inverse and log-determinant of a Slater matrix.

mod tracker;

pub use tracker::DeterminantTracker;
pub use crate::numerics::Sign;

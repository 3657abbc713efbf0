//! Rust QMC kernels - the numerical core of particle-by-particle Monte Carlo.
//!
//! This crate provides the two pieces a walker touches on every single-particle
//! move: a source-target [`DistanceTable`] with trial/commit rows and cutoff
//! neighbor lists, and a [`DeterminantTracker`] that keeps the inverse and
//! `log|det|` of a Slater matrix current through Sherman-Morrison updates.

pub mod error;
pub mod numerics;
pub mod particle;
pub mod distance;
pub mod determinant;
pub mod io;
pub mod checks;

// Re-export commonly used types at crate root
pub use error::QmcError;
pub use numerics::{Real, Sign};
pub use particle::{ParticleSet, Position};
pub use distance::{
    BoundaryPolicy, CompactNeighbors, DistanceTable, OpenBoundary, PeriodicGeneral,
    PeriodicOrthorhombic,
};
pub use determinant::DeterminantTracker;
pub use io::{read_config, BoundaryConfig, Precision, SimulationConfig};
pub use checks::{
    check_determinant, check_distance_table, CheckParams, DeterminantCheck, DistanceCheck,
};

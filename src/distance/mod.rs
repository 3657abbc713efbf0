//! Distance module - pair tables between a source and a target particle set.

mod boundary;
mod compact;
mod table;

pub use boundary::{BoundaryPolicy, OpenBoundary, PeriodicGeneral, PeriodicOrthorhombic};
pub use compact::CompactNeighbors;
pub use table::DistanceTable;

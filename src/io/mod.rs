//! IO module - configuration file handling.

mod config;

pub use config::{read_config, BoundaryConfig, Precision, SimulationConfig};

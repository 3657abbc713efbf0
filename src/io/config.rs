//! YAML run configuration for the kernel check driver.
//!
//! ```yaml
//! precision: double
//! dimension: 3
//! boundary:
//!   kind: periodic_orthorhombic
//!   lengths: [8.0, 8.0, 8.0]
//! cutoff: 3.0
//! sources: 64
//! targets: 128
//! orbitals: 32
//! sweeps: 4
//! seed: 11
//! ```

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use nalgebra::SMatrix;
use serde::{Deserialize, Serialize};
use tracing::debug;
use crate::error::QmcError;
use crate::numerics::{real, Real};
use crate::particle::Position;

/// Floating-point width the kernels are instantiated with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    Single,
    #[default]
    Double,
}

/// Boundary conditions, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BoundaryConfig {
    #[default]
    Open,
    /// Box edge lengths, one per dimension
    PeriodicOrthorhombic { lengths: Vec<f64> },
    /// Cell vectors, one inner list per vector
    PeriodicGeneral { lattice: Vec<Vec<f64>> },
}

impl BoundaryConfig {
    /// Box lengths as a fixed-size vector.
    pub fn lengths<T: Real, const D: usize>(lengths: &[f64]) -> Result<Position<T, D>, QmcError> {
        if lengths.len() != D {
            return Err(QmcError::InvalidParameter(format!(
                "expected {D} box lengths, got {}",
                lengths.len()
            )));
        }
        Ok(Position::from_fn(|d, _| real(lengths[d])))
    }

    /// Cell vectors as the columns of a `D x D` matrix.
    pub fn lattice<T: Real, const D: usize>(
        vectors: &[Vec<f64>],
    ) -> Result<SMatrix<T, D, D>, QmcError> {
        if vectors.len() != D || vectors.iter().any(|v| v.len() != D) {
            return Err(QmcError::InvalidParameter(format!(
                "expected {D} cell vectors of length {D}"
            )));
        }
        Ok(SMatrix::from_fn(|i, j| real(vectors[j][i])))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub precision: Precision,
    pub dimension: usize,
    pub boundary: BoundaryConfig,
    /// Neighbor-list cutoff, `0` disables compaction
    pub cutoff: f64,
    pub sources: usize,
    pub targets: usize,
    /// Size of the determinant matrix
    pub orbitals: usize,
    pub sweeps: usize,
    /// Standard deviation of the Gaussian trial displacement
    pub step_size: f64,
    /// Edge of the cube random particles are placed in
    pub box_length: f64,
    /// Probability of committing a proposed move
    pub acceptance: f64,
    /// Sweeps between re-factorizations, `0` for never
    pub recompute_interval: usize,
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            precision: Precision::Double,
            dimension: 3,
            boundary: BoundaryConfig::Open,
            cutoff: 0.0,
            sources: 32,
            targets: 64,
            orbitals: 16,
            sweeps: 4,
            step_size: 0.5,
            box_length: 8.0,
            acceptance: 0.5,
            recompute_interval: 0,
            seed: 0,
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<(), QmcError> {
        if !matches!(self.dimension, 2 | 3) {
            return Err(QmcError::InvalidParameter(format!(
                "dimension must be 2 or 3, got {}",
                self.dimension
            )));
        }
        match &self.boundary {
            BoundaryConfig::Open => {}
            BoundaryConfig::PeriodicOrthorhombic { lengths } => {
                if lengths.len() != self.dimension {
                    return Err(QmcError::InvalidParameter(format!(
                        "{} box lengths given for dimension {}",
                        lengths.len(),
                        self.dimension
                    )));
                }
            }
            BoundaryConfig::PeriodicGeneral { lattice } => {
                let dimension = self.dimension;
                if lattice.len() != dimension || lattice.iter().any(|v| v.len() != dimension) {
                    return Err(QmcError::InvalidParameter(format!(
                        "lattice must hold {0} vectors of length {0}",
                        self.dimension
                    )));
                }
            }
        }
        if !(self.cutoff >= 0.0) {
            return Err(QmcError::InvalidParameter(format!(
                "cutoff must be non-negative, got {}",
                self.cutoff
            )));
        }
        if !(0.0..=1.0).contains(&self.acceptance) {
            return Err(QmcError::InvalidParameter(format!(
                "acceptance must be in [0, 1], got {}",
                self.acceptance
            )));
        }
        if !(self.step_size > 0.0) || !(self.box_length > 0.0) {
            return Err(QmcError::InvalidParameter(
                "step_size and box_length must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parse and validate a configuration file.
pub fn read_config<P: AsRef<Path>>(path: P) -> Result<SimulationConfig, QmcError> {
    let path = path.as_ref();
    let reader = BufReader::new(File::open(path)?);
    let config: SimulationConfig = serde_yaml::from_reader(reader)?;
    config.validate()?;
    debug!("loaded configuration from {}", path.display());
    Ok(config)
}

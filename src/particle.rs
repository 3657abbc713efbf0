//! Minimal particle container feeding positions to the kernels.
//!
//! Positions are kept twice: as `SVector`s for per-particle access and as a
//! struct-of-arrays mirror (one padded row per dimension) for the row kernels.

use nalgebra::SVector;
use rand::Rng;
use crate::error::QmcError;
use crate::numerics::{real, AlignedRows, Real};

/// A point in `D`-dimensional space.
pub type Position<T, const D: usize> = SVector<T, D>;

#[derive(Debug, Clone)]
pub struct ParticleSet<T: Real, const D: usize> {
    positions: Vec<Position<T, D>>,
    soa: AlignedRows<T>,
}

impl<T: Real, const D: usize> ParticleSet<T, D> {
    pub fn new(positions: Vec<Position<T, D>>) -> Result<Self, QmcError> {
        let mut soa = AlignedRows::new(D, positions.len(), T::zero())?;
        for (i, r) in positions.iter().enumerate() {
            for d in 0..D {
                soa.row_mut(d)[i] = r[d];
            }
        }
        Ok(Self { positions, soa })
    }

    /// `n` particles placed uniformly in the cube `[0, extent)^D`.
    pub fn random<R: Rng + ?Sized>(n: usize, extent: f64, rng: &mut R) -> Result<Self, QmcError> {
        let positions = (0..n)
            .map(|_| Position::<T, D>::from_fn(|_, _| real(rng.gen::<f64>() * extent)))
            .collect();
        Self::new(positions)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn positions(&self) -> &[Position<T, D>] {
        &self.positions
    }

    #[inline]
    pub fn position(&self, i: usize) -> &Position<T, D> {
        &self.positions[i]
    }

    /// Coordinates as `D` padded rows, one per dimension.
    pub fn soa(&self) -> &AlignedRows<T> {
        &self.soa
    }

    /// Move particle `i`, keeping both layouts in sync.
    pub fn set_position(&mut self, i: usize, r: Position<T, D>) {
        self.positions[i] = r;
        for d in 0..D {
            self.soa.row_mut(d)[i] = r[d];
        }
    }
}

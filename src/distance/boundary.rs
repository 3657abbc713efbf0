//! Boundary conditions applied to pair displacements.
//!
//! A policy is chosen once when a [`DistanceTable`](super::DistanceTable) is
//! built; the table is generic over it so the per-pair call is monomorphized.

use nalgebra::SMatrix;
use crate::error::QmcError;
use crate::numerics::Real;
use crate::particle::Position;

/// Minimum-image convention of a simulation cell.
pub trait BoundaryPolicy<T: Real, const D: usize>: Send + Sync {
    /// Replace `dr` by its minimum image and return its length.
    fn minimum_image(&self, dr: &mut Position<T, D>) -> T;
}

/// No periodicity: displacements are used as they are.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenBoundary;

impl<T: Real, const D: usize> BoundaryPolicy<T, D> for OpenBoundary {
    #[inline(always)]
    fn minimum_image(&self, dr: &mut Position<T, D>) -> T {
        dr.norm()
    }
}

/// Periodic box with axis-aligned sides.
#[derive(Debug, Clone, Copy)]
pub struct PeriodicOrthorhombic<T: Real, const D: usize> {
    lengths: Position<T, D>,
    inv_lengths: Position<T, D>,
}

impl<T: Real, const D: usize> PeriodicOrthorhombic<T, D> {
    pub fn new(lengths: Position<T, D>) -> Result<Self, QmcError> {
        if lengths.iter().any(|&l| l <= T::zero() || !l.is_finite()) {
            return Err(QmcError::InvalidParameter(format!(
                "periodic box lengths must be positive, got {:?}",
                lengths.as_slice()
            )));
        }
        Ok(Self { lengths, inv_lengths: lengths.map(|l| T::one() / l) })
    }

    pub fn lengths(&self) -> &Position<T, D> {
        &self.lengths
    }
}

impl<T: Real, const D: usize> BoundaryPolicy<T, D> for PeriodicOrthorhombic<T, D> {
    #[inline(always)]
    fn minimum_image(&self, dr: &mut Position<T, D>) -> T {
        for d in 0..D {
            let shift = self.lengths[d] * (dr[d] * self.inv_lengths[d]).round();
            dr[d] -= shift;
        }
        dr.norm()
    }
}

/// Periodic cell of arbitrary shape.
///
/// Displacements are first reduced in fractional coordinates, then the
/// neighboring images are searched, which makes the result exact for cells
/// that are not too strongly skewed.
#[derive(Debug, Clone)]
pub struct PeriodicGeneral<T: Real, const D: usize> {
    /// Cell vectors as columns
    lattice: SMatrix<T, D, D>,
    inverse: SMatrix<T, D, D>,
    /// Translations to the 3^D - 1 neighboring images
    images: Vec<Position<T, D>>,
}

impl<T: Real, const D: usize> PeriodicGeneral<T, D> {
    /// Build from a matrix whose columns are the cell vectors.
    pub fn new(lattice: SMatrix<T, D, D>) -> Result<Self, QmcError> {
        let inverse = lattice.try_inverse().ok_or_else(|| {
            QmcError::InvalidParameter("cell vectors are linearly dependent".into())
        })?;

        let n_images = 3_usize.pow(D as u32);
        let mut images = Vec::with_capacity(n_images - 1);
        for code in 0..n_images {
            let mut rest = code;
            let shift = Position::<T, D>::from_fn(|_, _| {
                let digit = rest % 3;
                rest /= 3;
                match digit {
                    0 => -T::one(),
                    1 => T::zero(),
                    _ => T::one(),
                }
            });
            if shift.iter().any(|&s| s != T::zero()) {
                images.push(lattice * shift);
            }
        }

        Ok(Self { lattice, inverse, images })
    }

    pub fn lattice(&self) -> &SMatrix<T, D, D> {
        &self.lattice
    }
}

impl<T: Real, const D: usize> BoundaryPolicy<T, D> for PeriodicGeneral<T, D> {
    #[inline]
    fn minimum_image(&self, dr: &mut Position<T, D>) -> T {
        let mut fractional = self.inverse * *dr;
        for s in fractional.iter_mut() {
            let nearest = s.round();
            *s -= nearest;
        }
        let reduced = self.lattice * fractional;

        let mut best = reduced;
        let mut best_r2 = reduced.norm_squared();
        for image in &self.images {
            let candidate = reduced + image;
            let r2 = candidate.norm_squared();
            if r2 < best_r2 {
                best = candidate;
                best_r2 = r2;
            }
        }
        *dr = best;
        best_r2.sqrt()
    }
}

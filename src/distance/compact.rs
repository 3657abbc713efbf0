//! Cutoff-filtered, source-major neighbor lists built from a dense table.

use rayon::prelude::*;
use crate::error::QmcError;
use crate::numerics::{AlignedRows, Real};
use crate::particle::Position;

/// Sources per rayon task when compacting.
const MIN_SOURCES_PER_TASK: usize = 16;

/// For each source, the targets closer than the cutoff, in ascending target order.
///
/// Displacements are stored source-centric (`source - target`), the opposite
/// sign of the dense table.
#[derive(Debug, Clone)]
pub struct CompactNeighbors<T: Real, const D: usize> {
    cutoff: T,
    counts: Vec<usize>,
    indices: AlignedRows<usize>,
    distances: AlignedRows<T>,
    displacements: AlignedRows<Position<T, D>>,
}

impl<T: Real, const D: usize> CompactNeighbors<T, D> {
    pub(super) fn new(n_sources: usize, n_targets: usize) -> Result<Self, QmcError> {
        Ok(Self {
            cutoff: T::zero(),
            counts: vec![0; n_sources],
            indices: AlignedRows::new(n_sources, n_targets, 0)?,
            distances: AlignedRows::new(n_sources, n_targets, T::zero())?,
            displacements: AlignedRows::new(n_sources, n_targets, Position::zeros())?,
        })
    }

    pub(super) fn fits(&self, n_sources: usize, n_targets: usize) -> bool {
        self.counts.len() == n_sources && self.indices.cols() == n_targets
    }

    /// Refill every source's list from the dense target-major table.
    ///
    /// `displacements` holds `D` padded rows per target, the layout of
    /// [`DistanceTable`](super::DistanceTable).
    pub(super) fn rebuild(
        &mut self,
        cutoff: T,
        distances: &AlignedRows<T>,
        displacements: &AlignedRows<T>,
    ) {
        self.cutoff = cutoff;
        let n_targets = distances.rows();
        if self.counts.is_empty() || n_targets == 0 {
            return;
        }
        let index_stride = self.indices.stride();
        let dist_stride = self.distances.stride();
        let disp_stride = self.displacements.stride();

        self.counts
            .par_iter_mut()
            .zip(self.indices.as_mut_slice().par_chunks_mut(index_stride))
            .zip(self.distances.as_mut_slice().par_chunks_mut(dist_stride))
            .zip(self.displacements.as_mut_slice().par_chunks_mut(disp_stride))
            .enumerate()
            .with_min_len(MIN_SOURCES_PER_TASK)
            .for_each(|(source, (((count, jptr), rptr), dptr))| {
                let mut nn = 0;
                for target in 0..n_targets {
                    let rij = distances.row(target)[source];
                    if rij < cutoff {
                        rptr[nn] = rij;
                        dptr[nn] = Position::from_fn(|d, _| {
                            -displacements.row(target * D + d)[source]
                        });
                        jptr[nn] = target;
                        nn += 1;
                    }
                }
                *count = nn;
            });
    }

    /// Cutoff used by the last rebuild.
    pub fn cutoff(&self) -> T {
        self.cutoff
    }

    pub fn n_sources(&self) -> usize {
        self.counts.len()
    }

    /// Number of targets within the cutoff of `source`.
    pub fn count(&self, source: usize) -> usize {
        self.counts[source]
    }

    pub fn indices(&self, source: usize) -> &[usize] {
        &self.indices.row(source)[..self.counts[source]]
    }

    pub fn distances(&self, source: usize) -> &[T] {
        &self.distances.row(source)[..self.counts[source]]
    }

    /// `source - target` for each listed target.
    pub fn displacements(&self, source: usize) -> &[Position<T, D>] {
        &self.displacements.row(source)[..self.counts[source]]
    }

    /// Total number of listed pairs.
    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }
}

//! Source-target distance table with per-particle trial moves.
//!
//! Rows are indexed by target and padded along the source dimension. The
//! displacement of pair `(t, s)` is `target - source` after the boundary
//! policy's minimum image, and is stored as `D` padded rows per target, all
//! carved from one allocation.

use rayon::prelude::*;
use tracing::debug;
use crate::error::QmcError;
use crate::numerics::{AlignedRows, Real};
use crate::particle::{ParticleSet, Position};
use super::boundary::BoundaryPolicy;
use super::compact::CompactNeighbors;

/// Target rows per rayon task for the full-table evaluation.
const MIN_TARGETS_PER_TASK: usize = 8;

pub struct DistanceTable<T: Real, B, const D: usize> {
    boundary: B,
    n_sources: usize,
    n_targets: usize,
    /// `n_targets x n_sources`
    distances: AlignedRows<T>,
    /// `(n_targets * D) x n_sources`, row `t * D + d` is dimension `d` of target `t`
    displacements: AlignedRows<T>,
    /// Single row from the last trial evaluation
    temp_distances: AlignedRows<T>,
    /// `D x n_sources` from the last trial evaluation
    temp_displacements: AlignedRows<T>,
    neighbors: Option<CompactNeighbors<T, D>>,
    trial_pending: bool,
}

/// Distances and displacements from `origin` to every source, written into one
/// row and one block of `D` padded rows.
#[inline]
fn fill_row<T: Real, B: BoundaryPolicy<T, D>, const D: usize>(
    boundary: &B,
    origin: &Position<T, D>,
    sources: &AlignedRows<T>,
    distances: &mut [T],
    displacements: &mut [T],
    stride: usize,
) {
    for s in 0..sources.cols() {
        let mut dr = Position::<T, D>::from_fn(|d, _| origin[d] - sources.row(d)[s]);
        distances[s] = boundary.minimum_image(&mut dr);
        for d in 0..D {
            displacements[d * stride + s] = dr[d];
        }
    }
}

impl<T: Real, B: BoundaryPolicy<T, D>, const D: usize> DistanceTable<T, B, D> {
    pub fn new(boundary: B, n_sources: usize, n_targets: usize) -> Result<Self, QmcError> {
        let mut table = Self {
            boundary,
            n_sources: 0,
            n_targets: 0,
            distances: AlignedRows::default(),
            displacements: AlignedRows::default(),
            temp_distances: AlignedRows::default(),
            temp_displacements: AlignedRows::default(),
            neighbors: None,
            trial_pending: false,
        };
        table.resize(n_sources, n_targets)?;
        Ok(table)
    }

    /// Reallocate every buffer for `n_sources x n_targets` pairs.
    ///
    /// With either count zero all buffers are left empty and every other
    /// operation becomes a no-op. Any compact neighbor list is dropped. On an
    /// allocation failure the table keeps its previous size and contents.
    pub fn resize(&mut self, n_sources: usize, n_targets: usize) -> Result<(), QmcError> {
        let (distances, displacements, temp_distances, temp_displacements) =
            if n_sources == 0 || n_targets == 0 {
                Default::default()
            } else {
                let rows = n_targets
                    .checked_mul(D)
                    .ok_or(QmcError::Allocation { elements: usize::MAX })?;
                (
                    AlignedRows::new(n_targets, n_sources, T::zero())?,
                    AlignedRows::new(rows, n_sources, T::zero())?,
                    AlignedRows::new(1, n_sources, T::zero())?,
                    AlignedRows::new(D, n_sources, T::zero())?,
                )
            };

        self.n_sources = n_sources;
        self.n_targets = n_targets;
        self.distances = distances;
        self.displacements = displacements;
        self.temp_distances = temp_distances;
        self.temp_displacements = temp_displacements;
        self.neighbors = None;
        self.trial_pending = false;
        debug!(
            "distance table resized to {} sources x {} targets (stride {})",
            n_sources,
            n_targets,
            self.distances.stride()
        );
        Ok(())
    }

    pub fn n_sources(&self) -> usize {
        self.n_sources
    }

    pub fn n_targets(&self) -> usize {
        self.n_targets
    }

    pub fn is_empty(&self) -> bool {
        self.n_sources == 0 || self.n_targets == 0
    }

    pub fn boundary(&self) -> &B {
        &self.boundary
    }

    /// Recompute every target row.
    pub fn evaluate(&mut self, sources: &ParticleSet<T, D>, targets: &ParticleSet<T, D>) {
        if self.is_empty() {
            return;
        }
        debug_assert_eq!(sources.len(), self.n_sources);
        debug_assert_eq!(targets.len(), self.n_targets);

        let boundary = &self.boundary;
        let soa = sources.soa();
        let dist_stride = self.distances.stride();
        let stride = self.displacements.stride();
        self.distances
            .as_mut_slice()
            .par_chunks_mut(dist_stride)
            .zip(self.displacements.as_mut_slice().par_chunks_mut(D * stride))
            .zip(targets.positions().par_iter())
            .with_min_len(MIN_TARGETS_PER_TASK)
            .for_each(|((distances, displacements), origin)| {
                fill_row(boundary, origin, soa, distances, displacements, stride);
            });
    }

    /// Recompute the row of target `iat` from its current position.
    pub fn evaluate_row(
        &mut self,
        sources: &ParticleSet<T, D>,
        targets: &ParticleSet<T, D>,
        iat: usize,
    ) {
        if self.is_empty() {
            return;
        }
        debug_assert!(iat < self.n_targets);
        let stride = self.displacements.stride();
        fill_row(
            &self.boundary,
            targets.position(iat),
            sources.soa(),
            self.distances.row_mut(iat),
            self.displacements.block_mut(iat * D, D),
            stride,
        );
    }

    /// Fill the trial row for a particle proposed at `rnew`.
    ///
    /// The committed table is untouched; each call replaces the previous trial.
    pub fn evaluate_trial(&mut self, sources: &ParticleSet<T, D>, rnew: &Position<T, D>) {
        if self.is_empty() {
            return;
        }
        let stride = self.temp_displacements.stride();
        fill_row(
            &self.boundary,
            rnew,
            sources.soa(),
            self.temp_distances.row_mut(0),
            self.temp_displacements.as_mut_slice(),
            stride,
        );
        self.trial_pending = true;
    }

    /// Same computation as [`evaluate_trial`](Self::evaluate_trial), for
    /// callers sampling points around a particle that are never committed.
    pub fn move_on_sphere(&mut self, sources: &ParticleSet<T, D>, rnew: &Position<T, D>) {
        self.evaluate_trial(sources, rnew);
    }

    /// Copy the trial row into row `iat`.
    ///
    /// Must follow an [`evaluate_trial`](Self::evaluate_trial) for the same move.
    pub fn commit(&mut self, iat: usize) {
        if self.is_empty() {
            return;
        }
        debug_assert!(self.trial_pending, "commit without a trial evaluation");
        debug_assert!(iat < self.n_targets);

        self.distances.copy_row_from(iat, self.temp_distances.row(0));
        for d in 0..D {
            self.displacements
                .copy_row_from(iat * D + d, self.temp_displacements.row(d));
        }
        self.trial_pending = false;
    }

    /// Build the per-source lists of targets closer than `cutoff`.
    ///
    /// A cutoff below machine epsilon means no cutoff interaction is in effect:
    /// the lists are left exactly as they were (unallocated on a fresh table).
    pub fn compact(&mut self, cutoff: T) -> Result<(), QmcError> {
        if cutoff < T::default_epsilon() || self.is_empty() {
            return Ok(());
        }
        let (n_sources, n_targets) = (self.n_sources, self.n_targets);
        if !matches!(&self.neighbors, Some(list) if list.fits(n_sources, n_targets)) {
            self.neighbors = Some(CompactNeighbors::new(n_sources, n_targets)?);
        }
        if let Some(list) = self.neighbors.as_mut() {
            list.rebuild(cutoff, &self.distances, &self.displacements);
        }
        Ok(())
    }

    /// Neighbor lists from the last non-trivial [`compact`](Self::compact).
    pub fn neighbors(&self) -> Option<&CompactNeighbors<T, D>> {
        self.neighbors.as_ref()
    }

    /// Distances from target `t` to every source.
    #[inline]
    pub fn distances(&self, t: usize) -> &[T] {
        if self.is_empty() {
            return &[];
        }
        self.distances.row(t)
    }

    #[inline]
    pub fn distance(&self, t: usize, s: usize) -> T {
        self.distances.row(t)[s]
    }

    /// Component `d` of the displacements from every source to target `t`.
    #[inline]
    pub fn displacement_row(&self, t: usize, d: usize) -> &[T] {
        if self.is_empty() {
            return &[];
        }
        self.displacements.row(t * D + d)
    }

    /// `target - source` for pair `(t, s)`.
    pub fn displacement(&self, t: usize, s: usize) -> Position<T, D> {
        Position::from_fn(|d, _| self.displacements.row(t * D + d)[s])
    }

    /// Distances of the last trial evaluation.
    pub fn temp_distances(&self) -> &[T] {
        if self.is_empty() {
            return &[];
        }
        self.temp_distances.row(0)
    }

    pub fn temp_displacement_row(&self, d: usize) -> &[T] {
        if self.is_empty() {
            return &[];
        }
        self.temp_displacements.row(d)
    }

    pub fn temp_displacement(&self, s: usize) -> Position<T, D> {
        Position::from_fn(|d, _| self.temp_displacements.row(d)[s])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use nalgebra::Matrix3;
    use crate::distance::{OpenBoundary, PeriodicGeneral, PeriodicOrthorhombic};

    fn random_sets(
        n_sources: usize,
        n_targets: usize,
        seed: u64,
    ) -> (ParticleSet<f64, 3>, ParticleSet<f64, 3>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let sources = ParticleSet::random(n_sources, 4.0, &mut rng).unwrap();
        let targets = ParticleSet::random(n_targets, 4.0, &mut rng).unwrap();
        (sources, targets)
    }

    #[test]
    fn test_full_evaluation_matches_direct_distances() {
        let (sources, targets) = random_sets(5, 7, 1);
        let mut table = DistanceTable::new(OpenBoundary, 5, 7).unwrap();
        table.evaluate(&sources, &targets);

        for t in 0..7 {
            assert_eq!(table.distances(t).len(), 5);
            for s in 0..5 {
                let dr = targets.position(t) - sources.position(s);
                assert_relative_eq!(table.distance(t, s), dr.norm(), epsilon = 1e-14);
                assert_relative_eq!(table.displacement(t, s), dr, epsilon = 1e-14);
                assert_eq!(table.displacement_row(t, 1)[s], dr.y);
            }
        }
    }

    #[test]
    fn test_open_boundary_pair_symmetry() {
        let mut rng = StdRng::seed_from_u64(2);
        for _ in 0..20 {
            let a = Vector3::new(rng.gen::<f64>(), rng.gen(), rng.gen()) * 3.0;
            let b = Vector3::new(rng.gen::<f64>(), rng.gen(), rng.gen()) * 3.0;
            let set_a = ParticleSet::new(vec![a]).unwrap();
            let set_b = ParticleSet::new(vec![b]).unwrap();

            let mut ab = DistanceTable::new(OpenBoundary, 1, 1).unwrap();
            let mut ba = DistanceTable::new(OpenBoundary, 1, 1).unwrap();
            ab.evaluate(&set_a, &set_b);
            ba.evaluate(&set_b, &set_a);

            assert_eq!(ab.distance(0, 0), ba.distance(0, 0));
            assert_eq!(ab.displacement(0, 0), -ba.displacement(0, 0));
        }
    }

    #[test]
    fn test_trials_leave_committed_rows_until_commit() {
        let (sources, mut targets) = random_sets(6, 4, 3);
        let mut table = DistanceTable::new(OpenBoundary, 6, 4).unwrap();
        table.evaluate(&sources, &targets);
        let before: Vec<f64> = (0..4).flat_map(|t| table.distances(t).to_vec()).collect();

        let candidates = [
            Vector3::new(0.1, 0.2, 0.3),
            Vector3::new(3.0, 1.0, 2.0),
            Vector3::new(1.5, 1.5, 1.5),
        ];
        for rnew in &candidates {
            table.evaluate_trial(&sources, rnew);
            let after: Vec<f64> = (0..4).flat_map(|t| table.distances(t).to_vec()).collect();
            assert_eq!(before, after);
        }

        let last = candidates[2];
        let trial_row = table.temp_distances().to_vec();
        let trial_disp: Vec<_> = (0..6).map(|s| table.temp_displacement(s)).collect();
        table.commit(2);
        targets.set_position(2, last);

        assert_eq!(table.distances(2), trial_row.as_slice());
        for s in 0..6 {
            assert_eq!(table.displacement(2, s), trial_disp[s]);
        }

        let mut fresh = DistanceTable::new(OpenBoundary, 6, 4).unwrap();
        fresh.evaluate(&sources, &targets);
        for t in 0..4 {
            assert_eq!(fresh.distances(t), table.distances(t));
        }
    }

    #[test]
    fn test_evaluate_row_resyncs_one_target() {
        let (sources, mut targets) = random_sets(9, 5, 4);
        let mut table = DistanceTable::new(OpenBoundary, 9, 5).unwrap();
        table.evaluate(&sources, &targets);
        let untouched = table.distances(0).to_vec();

        targets.set_position(3, Vector3::new(-1.0, 0.5, 2.0));
        table.evaluate_row(&sources, &targets, 3);

        assert_eq!(table.distances(0), untouched.as_slice());
        for s in 0..9 {
            let dr = targets.position(3) - sources.position(s);
            assert_relative_eq!(table.distance(3, s), dr.norm(), epsilon = 1e-14);
        }
    }

    #[test]
    fn test_compact_lists_targets_within_cutoff_in_order() {
        let (sources, targets) = random_sets(8, 30, 5);
        let cell = PeriodicOrthorhombic::new(Vector3::from_element(4.0)).unwrap();
        let mut table = DistanceTable::new(cell, 8, 30).unwrap();
        table.evaluate(&sources, &targets);
        table.compact(1.5).unwrap();

        let list = table.neighbors().unwrap();
        assert_eq!(list.cutoff(), 1.5);
        for s in 0..8 {
            let expected: Vec<usize> = (0..30).filter(|&t| table.distance(t, s) < 1.5).collect();
            assert_eq!(list.indices(s), expected.as_slice());
            assert_eq!(list.count(s), expected.len());
            for (k, &t) in expected.iter().enumerate() {
                assert_eq!(list.distances(s)[k], table.distance(t, s));
                assert_eq!(list.displacements(s)[k], -table.displacement(t, s));
            }
        }
    }

    #[test]
    fn test_zero_cutoff_keeps_neighbor_lists() {
        let sources = ParticleSet::new(vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
            Vector3::new(0.0, 0.0, 1.0),
        ])
        .unwrap();
        let targets = ParticleSet::new(vec![
            Vector3::new(0.5, 0.0, 0.0),
            Vector3::new(2.0, 0.0, 0.0),
            Vector3::new(0.0, 0.5, 0.5),
            Vector3::new(3.0, 3.0, 3.0),
        ])
        .unwrap();
        let mut table = DistanceTable::new(OpenBoundary, 4, 4).unwrap();
        table.evaluate(&sources, &targets);

        table.compact(0.0).unwrap();
        assert!(table.neighbors().is_none());

        table.compact(1.0).unwrap();
        let built = table.neighbors().unwrap().clone();
        assert_eq!(built.indices(0), &[0, 2]);

        table.compact(0.0).unwrap();
        let kept = table.neighbors().unwrap();
        assert_eq!(kept.cutoff(), built.cutoff());
        for s in 0..4 {
            assert_eq!(kept.indices(s), built.indices(s));
            assert_eq!(kept.distances(s), built.distances(s));
            assert_eq!(kept.displacements(s), built.displacements(s));
        }
    }

    #[test]
    fn test_zero_sized_table_is_noop() {
        let (sources, targets) = random_sets(0, 3, 6);
        let mut table = DistanceTable::new(OpenBoundary, 0, 3).unwrap();
        assert!(table.is_empty());
        table.evaluate(&sources, &targets);
        table.evaluate_trial(&sources, &Vector3::zeros());
        table.commit(0);
        table.compact(2.0).unwrap();
        assert!(table.neighbors().is_none());
        assert!(table.temp_distances().is_empty());
        assert!(table.temp_displacement_row(0).is_empty());
        assert!(table.distances(0).is_empty());
        assert!(table.displacement_row(0, 2).is_empty());
    }

    #[test]
    fn test_failed_resize_keeps_previous_table() {
        let (sources, targets) = random_sets(4, 4, 9);
        let mut table = DistanceTable::new(OpenBoundary, 4, 4).unwrap();
        table.evaluate(&sources, &targets);
        let before: Vec<f64> = (0..4).flat_map(|t| table.distances(t).to_vec()).collect();

        let result = table.resize(1 << 60, 4);
        assert!(matches!(result, Err(QmcError::Allocation { .. })));
        assert_eq!(table.n_sources(), 4);
        assert_eq!(table.n_targets(), 4);
        assert!(!table.is_empty());

        let after: Vec<f64> = (0..4).flat_map(|t| table.distances(t).to_vec()).collect();
        assert_eq!(before, after);
        table.evaluate(&sources, &targets);
        table.evaluate_trial(&sources, &Vector3::new(1.0, 1.0, 1.0));
        table.commit(0);
    }

    #[test]
    fn test_move_on_sphere_fills_trial_row_only() {
        let (sources, targets) = random_sets(5, 3, 10);
        let mut table = DistanceTable::new(OpenBoundary, 5, 3).unwrap();
        table.evaluate(&sources, &targets);
        let committed: Vec<f64> = (0..3).flat_map(|t| table.distances(t).to_vec()).collect();

        let center = *targets.position(1);
        for direction in [Vector3::x(), -Vector3::y(), Vector3::z()] {
            let rnew = center + direction * 0.25;
            table.move_on_sphere(&sources, &rnew);
            for s in 0..5 {
                let dr = rnew - sources.position(s);
                assert_relative_eq!(table.temp_distances()[s], dr.norm(), epsilon = 1e-14);
                assert_relative_eq!(table.temp_displacement(s), dr, epsilon = 1e-14);
            }
        }
        let after: Vec<f64> = (0..3).flat_map(|t| table.distances(t).to_vec()).collect();
        assert_eq!(committed, after);
    }

    #[test]
    fn test_skewed_cell_matches_image_search() {
        // columns are the cell vectors
        let lattice = Matrix3::new(4.0, 1.5, 0.5, 0.0, 3.5, 1.0, 0.0, 0.0, 3.0);
        let cell = PeriodicGeneral::new(lattice).unwrap();
        let (sources, targets) = random_sets(6, 7, 11);
        let mut table = DistanceTable::new(cell, 6, 7).unwrap();
        table.evaluate(&sources, &targets);

        for t in 0..7 {
            for s in 0..6 {
                let dr = targets.position(t) - sources.position(s);
                let mut best = f64::INFINITY;
                for i in -3..=3 {
                    for j in -3..=3 {
                        for k in -3..=3 {
                            let shift = lattice * Vector3::new(i as f64, j as f64, k as f64);
                            best = best.min((dr + shift).norm());
                        }
                    }
                }
                assert_relative_eq!(table.distance(t, s), best, epsilon = 1e-12);
                assert_relative_eq!(table.displacement(t, s).norm(), best, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_periodic_distances_bounded_by_half_diagonal() {
        let (sources, targets) = random_sets(10, 10, 7);
        let cell = PeriodicOrthorhombic::new(Vector3::from_element(2.0)).unwrap();
        let mut table = DistanceTable::new(cell, 10, 10).unwrap();
        table.evaluate(&sources, &targets);
        let half_diagonal = 3.0_f64.sqrt();
        for t in 0..10 {
            assert!(table.distances(t).iter().all(|&r| r <= half_diagonal + 1e-12));
        }
    }

    #[test]
    fn test_single_precision_table() {
        let mut rng = StdRng::seed_from_u64(8);
        let sources = ParticleSet::<f32, 2>::random(17, 2.0, &mut rng).unwrap();
        let targets = ParticleSet::<f32, 2>::random(3, 2.0, &mut rng).unwrap();
        let mut table = DistanceTable::new(OpenBoundary, 17, 3).unwrap();
        table.evaluate(&sources, &targets);
        for s in 0..17 {
            let dr = targets.position(1) - sources.position(s);
            assert_relative_eq!(table.distance(1, s), dr.norm(), epsilon = 1e-6);
        }
    }
}

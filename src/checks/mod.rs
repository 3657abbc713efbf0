//! Validation drivers.
//!
//! Each driver moves particles through a number of sweeps, calling the kernels
//! the way a simulation does, then compares the incrementally updated state
//! with the same state rebuilt from scratch.

use approx::relative_eq;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use tracing::{debug, info};
use crate::determinant::{DeterminantTracker, Sign};
use crate::distance::{BoundaryPolicy, DistanceTable};
use crate::error::QmcError;
use crate::io::SimulationConfig;
use crate::numerics::{random_matrix, real, Real};
use crate::particle::{ParticleSet, Position};

/// Proposals whose determinant ratio is smaller than this are always rejected.
const MIN_ACCEPTED_RATIO: f64 = 1e-3;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CheckParams {
    pub sweeps: usize,
    /// Standard deviation of a trial displacement
    pub step_size: f64,
    /// Probability of committing a proposal
    pub acceptance: f64,
    /// Sweeps between determinant re-factorizations, `0` for never
    pub recompute_interval: usize,
    /// Neighbor-list cutoff, `0` to skip compaction
    pub cutoff: f64,
}

impl Default for CheckParams {
    fn default() -> Self {
        Self::from(&SimulationConfig::default())
    }
}

impl From<&SimulationConfig> for CheckParams {
    fn from(config: &SimulationConfig) -> Self {
        Self {
            sweeps: config.sweeps,
            step_size: config.step_size,
            acceptance: config.acceptance,
            recompute_interval: config.recompute_interval,
            cutoff: config.cutoff,
        }
    }
}

/// Outcome of [`check_determinant`].
#[derive(Debug, Clone)]
pub struct DeterminantCheck<T> {
    pub attempted: usize,
    pub accepted: usize,
    /// Largest entry of `|inverse * matrix - I|` after the last sweep
    pub inverse_deviation: T,
    /// `|log|det||` of the tracker against a fresh factorization
    pub log_deviation: T,
    pub log_value: T,
    pub sign: Sign,
    pub sign_matches: bool,
    pub passed: bool,
}

/// Outcome of [`check_distance_table`].
#[derive(Debug, Clone)]
pub struct DistanceCheck<T> {
    pub attempted: usize,
    pub accepted: usize,
    /// Largest distance or displacement component difference to a direct evaluation
    pub max_deviation: T,
    /// Sources whose neighbor list disagrees with the dense table
    pub neighbor_mismatches: usize,
    /// Listed targets per source, `0` when no cutoff is set
    pub mean_neighbors: f64,
    pub passed: bool,
}

/// Tolerance for a comparison between incremental and fresh state of size `n`.
fn tolerance<T: Real>(n: usize) -> T {
    T::default_epsilon().sqrt() * real::<T>(n.max(1) as f64)
}

/// Replace every row in turn with a random one and accept with probability
/// `params.acceptance`.
pub fn check_determinant<T: Real, R: Rng + ?Sized>(
    tracker: &mut DeterminantTracker<T>,
    params: &CheckParams,
    rng: &mut R,
) -> Result<DeterminantCheck<T>, QmcError> {
    let n = tracker.len();
    let min_ratio: T = real(MIN_ACCEPTED_RATIO);
    let mut attempted = 0;
    let mut accepted = 0;
    let mut proposal = vec![T::zero(); n];

    for sweep in 0..params.sweeps {
        for row in 0..n {
            for x in proposal.iter_mut() {
                *x = real(rng.gen::<f64>() - 0.5);
            }
            let ratio = tracker.ratio(row, &proposal);
            attempted += 1;
            if ratio.abs() > min_ratio && rng.gen::<f64>() < params.acceptance {
                tracker.accept_row(row);
                accepted += 1;
            } else {
                tracker.discard_trial();
            }
        }
        if params.recompute_interval > 0 && (sweep + 1) % params.recompute_interval == 0 {
            tracker.recompute()?;
            debug!("recomputed determinant after sweep {}", sweep + 1);
        }
    }

    let fresh = DeterminantTracker::new(tracker.matrix().clone())?;
    let inverse_deviation = tracker.check_matrix();
    let log_deviation = (tracker.log_value() - fresh.log_value()).abs();
    let sign_matches = tracker.sign() == fresh.sign();
    let tol = tolerance::<T>(n);
    let passed = sign_matches
        && inverse_deviation <= tol
        && relative_eq!(tracker.log_value(), fresh.log_value(), epsilon = tol);

    info!(
        "determinant check: {}/{} accepted, inverse deviation {:?}, log deviation {:?}, \
         passed = {}",
        accepted, attempted, inverse_deviation, log_deviation, passed
    );
    Ok(DeterminantCheck {
        attempted,
        accepted,
        inverse_deviation,
        log_deviation,
        log_value: tracker.log_value(),
        sign: tracker.sign(),
        sign_matches,
        passed,
    })
}

/// Build a random `n x n` tracker and run [`check_determinant`] on it.
pub fn check_random_determinant<T: Real, R: Rng + ?Sized>(
    n: usize,
    params: &CheckParams,
    rng: &mut R,
) -> Result<DeterminantCheck<T>, QmcError> {
    let mut tracker = DeterminantTracker::new(random_matrix(n, rng))?;
    check_determinant(&mut tracker, params, rng)
}

/// Move every target by a Gaussian step, committing with probability
/// `params.acceptance`, then compare the table with direct pair evaluations.
pub fn check_distance_table<T, B, R, const D: usize>(
    table: &mut DistanceTable<T, B, D>,
    sources: &ParticleSet<T, D>,
    targets: &mut ParticleSet<T, D>,
    params: &CheckParams,
    rng: &mut R,
) -> Result<DistanceCheck<T>, QmcError>
where
    T: Real,
    B: BoundaryPolicy<T, D>,
    R: Rng + ?Sized,
{
    let step = Normal::new(0.0, params.step_size)
        .map_err(|e| QmcError::InvalidParameter(format!("step size {}: {e}", params.step_size)))?;
    table.evaluate(sources, targets);

    let mut attempted = 0;
    let mut accepted = 0;
    for _ in 0..params.sweeps {
        for iat in 0..targets.len() {
            let delta = Position::<T, D>::from_fn(|_, _| real(step.sample(rng)));
            let rnew = targets.position(iat) + delta;
            table.evaluate_trial(sources, &rnew);
            attempted += 1;
            if rng.gen::<f64>() < params.acceptance {
                targets.set_position(iat, rnew);
                table.commit(iat);
                accepted += 1;
            }
        }
    }

    let mut max_deviation = T::zero();
    for t in 0..table.n_targets() {
        for s in 0..table.n_sources() {
            let mut dr = targets.position(t) - sources.position(s);
            let r = table.boundary().minimum_image(&mut dr);
            max_deviation = max_deviation.max((table.distance(t, s) - r).abs());
            max_deviation = max_deviation.max((table.displacement(t, s) - dr).norm());
        }
    }

    let cutoff: T = real(params.cutoff);
    let mut neighbor_mismatches = 0;
    let mut mean_neighbors = 0.0;
    if params.cutoff > 0.0 {
        table.compact(cutoff)?;
        if let Some(neighbors) = table.neighbors() {
            for s in 0..neighbors.n_sources() {
                let expected = (0..table.n_targets()).filter(|&t| table.distance(t, s) < cutoff);
                if !expected.eq(neighbors.indices(s).iter().copied()) {
                    neighbor_mismatches += 1;
                }
            }
            if neighbors.n_sources() > 0 {
                mean_neighbors = neighbors.total() as f64 / neighbors.n_sources() as f64;
            }
        }
    }

    let passed = max_deviation <= tolerance::<T>(1) && neighbor_mismatches == 0;
    info!(
        "distance check: {}/{} accepted, max deviation {:?}, {:.2} neighbors per source, \
         passed = {}",
        accepted, attempted, max_deviation, mean_neighbors, passed
    );
    Ok(DistanceCheck {
        attempted,
        accepted,
        max_deviation,
        neighbor_mismatches,
        mean_neighbors,
        passed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::{OpenBoundary, PeriodicOrthorhombic};
    use nalgebra::Vector3;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn params() -> CheckParams {
        CheckParams {
            sweeps: 3,
            step_size: 0.3,
            acceptance: 0.5,
            recompute_interval: 0,
            cutoff: 2.0,
        }
    }

    #[test]
    fn test_params_from_config() {
        let config = SimulationConfig { sweeps: 9, acceptance: 0.25, ..Default::default() };
        let params = CheckParams::from(&config);
        assert_eq!(params.sweeps, 9);
        assert_eq!(params.acceptance, 0.25);
    }

    #[test]
    fn test_determinant_check_passes() {
        let mut rng = StdRng::seed_from_u64(41);
        let report = check_random_determinant::<f64, _>(12, &params(), &mut rng).unwrap();
        assert_eq!(report.attempted, 36);
        assert!(report.accepted > 0 && report.accepted < report.attempted);
        assert!(report.passed, "{report:?}");
    }

    #[test]
    fn test_determinant_check_with_recompute() {
        let mut rng = StdRng::seed_from_u64(43);
        let params = CheckParams { recompute_interval: 1, acceptance: 1.0, ..params() };
        let report = check_random_determinant::<f64, _>(8, &params, &mut rng).unwrap();
        assert!(report.passed, "{report:?}");
        assert!(report.inverse_deviation < 1e-10);
    }

    #[test]
    fn test_zero_acceptance_keeps_determinant() {
        let mut rng = StdRng::seed_from_u64(47);
        let mut tracker = DeterminantTracker::<f64>::random(6, &mut rng).unwrap();
        let log_value = tracker.log_value();
        let params = CheckParams { acceptance: 0.0, ..params() };
        let report = check_determinant(&mut tracker, &params, &mut rng).unwrap();
        assert_eq!(report.accepted, 0);
        assert_eq!(report.log_value, log_value);
        assert!(report.passed);
    }

    #[test]
    fn test_distance_check_periodic() {
        let mut rng = StdRng::seed_from_u64(53);
        let boundary = PeriodicOrthorhombic::new(Vector3::new(5.0, 5.0, 5.0)).unwrap();
        let sources = ParticleSet::<f64, 3>::random(20, 5.0, &mut rng).unwrap();
        let mut targets = ParticleSet::<f64, 3>::random(30, 5.0, &mut rng).unwrap();
        let mut table = DistanceTable::new(boundary, 20, 30).unwrap();

        let report =
            check_distance_table(&mut table, &sources, &mut targets, &params(), &mut rng).unwrap();
        assert_eq!(report.attempted, 90);
        assert_eq!(report.neighbor_mismatches, 0);
        assert!(report.mean_neighbors > 0.0);
        assert!(report.passed, "{report:?}");
    }

    #[test]
    fn test_distance_check_without_cutoff() {
        let mut rng = StdRng::seed_from_u64(59);
        let sources = ParticleSet::<f32, 2>::random(8, 3.0, &mut rng).unwrap();
        let mut targets = ParticleSet::<f32, 2>::random(5, 3.0, &mut rng).unwrap();
        let mut table = DistanceTable::new(OpenBoundary, 8, 5).unwrap();
        let params = CheckParams { cutoff: 0.0, ..params() };

        let report =
            check_distance_table(&mut table, &sources, &mut targets, &params, &mut rng).unwrap();
        assert!(table.neighbors().is_none());
        assert_eq!(report.mean_neighbors, 0.0);
        assert!(report.passed, "{report:?}");
    }

    #[test]
    fn test_bad_step_size_is_reported() {
        let mut rng = StdRng::seed_from_u64(61);
        let sources = ParticleSet::<f64, 3>::random(2, 1.0, &mut rng).unwrap();
        let mut targets = ParticleSet::<f64, 3>::random(2, 1.0, &mut rng).unwrap();
        let mut table = DistanceTable::new(OpenBoundary, 2, 2).unwrap();
        let params = CheckParams { step_size: f64::NAN, ..params() };
        let result = check_distance_table(&mut table, &sources, &mut targets, &params, &mut rng);
        assert!(matches!(result, Err(QmcError::InvalidParameter(_))));
    }
}

//! Slater matrix with an incrementally maintained inverse and log-determinant.
//!
//! Row `i` of the matrix belongs to particle `first_index + i`. The inverse is
//! the true inverse (`inverse * matrix = I`), so the ratio for replacing row
//! `i` reads column `i` of the inverse, which is contiguous in nalgebra's
//! column-major storage.
//!
//! A move is a `ratio` / `accept_row` pair. Rejecting a move needs no call:
//! `ratio` never touches the committed state.

use nalgebra::{DMatrix, DVector};
use rand::Rng;
use rayon::prelude::*;
use tracing::debug;
use crate::error::QmcError;
use crate::numerics::{identity_deviation, random_matrix, LuWorkspace, Real, Sign};

/// Inverse columns per rayon task in the rank-1 update.
const MIN_COLUMNS_PER_TASK: usize = 32;

#[derive(Debug, Clone, Copy)]
struct PendingTrial<T> {
    row: usize,
    ratio: T,
}

#[derive(Debug, Clone)]
pub struct DeterminantTracker<T: Real> {
    matrix: DMatrix<T>,
    inverse: DMatrix<T>,
    log_value: T,
    sign: Sign,
    first_index: usize,
    /// Proposed replacement row
    trial_row: DVector<T>,
    /// `u` of the Sherman-Morrison update
    update_row: DVector<T>,
    /// Copy of the inverse column being replaced
    inverse_column: DVector<T>,
    pending: Option<PendingTrial<T>>,
    workspace: LuWorkspace<T>,
}

impl<T: Real> DeterminantTracker<T> {
    /// Take ownership of a square matrix and factorize it.
    ///
    /// A singular matrix is reported as [`QmcError::SingularMatrix`].
    pub fn new(matrix: DMatrix<T>) -> Result<Self, QmcError> {
        if !matrix.is_square() {
            return Err(QmcError::InvalidParameter(format!(
                "determinant matrix must be square, got {}x{}",
                matrix.nrows(),
                matrix.ncols()
            )));
        }
        let n = matrix.nrows();
        let mut tracker = Self {
            matrix,
            inverse: DMatrix::zeros(n, n),
            log_value: T::zero(),
            sign: Sign::Positive,
            first_index: 0,
            trial_row: DVector::zeros(n),
            update_row: DVector::zeros(n),
            inverse_column: DVector::zeros(n),
            pending: None,
            workspace: LuWorkspace::new(n),
        };
        tracker.factorize()?;
        Ok(tracker)
    }

    /// `n x n` tracker over a matrix with entries uniform in `[-0.5, 0.5)`.
    pub fn random<R: Rng + ?Sized>(n: usize, rng: &mut R) -> Result<Self, QmcError> {
        Self::new(random_matrix(n, rng))
    }

    /// Let row `i` stand for particle `first_index + i`.
    pub fn with_first_index(mut self, first_index: usize) -> Self {
        self.first_index = first_index;
        self
    }

    /// Recompute the inverse, `log|det|` and sign from the matrix.
    ///
    /// Drops any pending trial, whether or not it succeeds. On failure the
    /// previous inverse and log-determinant are kept.
    pub fn factorize(&mut self) -> Result<(), QmcError> {
        self.pending = None;
        let (log_value, sign) = self.workspace.factorize(&self.matrix)?;
        self.workspace.invert_into(&mut self.inverse)?;
        self.log_value = log_value;
        self.sign = sign;
        debug!("factorized {}x{} determinant, log|det| = {:?}", self.len(), self.len(), log_value);
        Ok(())
    }

    /// Refactorize from scratch to discard the drift of accumulated updates.
    pub fn recompute(&mut self) -> Result<(), QmcError> {
        self.factorize()
    }

    /// `det(M') / det(M)` where `M'` has row `row` replaced by `new_row`.
    ///
    /// The row is kept for a following [`accept_row`](Self::accept_row). A zero
    /// ratio means the proposed row is linearly dependent on the others and the
    /// move must be rejected.
    pub fn ratio(&mut self, row: usize, new_row: &[T]) -> T {
        debug_assert!(row < self.len());
        debug_assert_eq!(new_row.len(), self.len());
        self.trial_row.as_mut_slice().copy_from_slice(new_row);
        let ratio = self.trial_row.dot(&self.inverse.column(row));
        self.pending = Some(PendingTrial { row, ratio });
        ratio
    }

    /// Commit the pending trial for `row` with a Sherman-Morrison rank-1 update.
    ///
    /// Must follow a [`ratio`](Self::ratio) call for the same row with a
    /// non-zero result.
    pub fn accept_row(&mut self, row: usize) {
        let trial = match self.pending.take() {
            Some(trial) => trial,
            None => {
                debug_assert!(false, "accept_row({row}) without a pending trial");
                return;
            }
        };
        debug_assert_eq!(trial.row, row);
        debug_assert!(trial.ratio != T::zero(), "accepting a zero-ratio move");

        let n = self.len();
        let c = T::one() / trial.ratio;

        // u = c * (v^T M^-1), with u[row] = 1 - c
        self.update_row.gemv_tr(c, &self.inverse, &self.trial_row, T::zero());
        self.update_row[row] = T::one() - c;
        self.inverse_column.copy_from(&self.inverse.column(row));

        let column = self.inverse_column.as_slice();
        let update = self.update_row.as_slice();
        self.inverse
            .as_mut_slice()
            .par_chunks_mut(n)
            .zip(update.par_iter())
            .with_min_len(MIN_COLUMNS_PER_TASK)
            .for_each(|(inverse_j, &uj)| {
                if uj == T::zero() {
                    return;
                }
                for (x, &ci) in inverse_j.iter_mut().zip(column) {
                    *x -= ci * uj;
                }
            });

        for k in 0..n {
            self.matrix[(row, k)] = self.trial_row[k];
        }
        self.log_value += trial.ratio.abs().ln();
        self.sign = self.sign * Sign::of(trial.ratio);
    }

    /// Forget the pending trial. Committed state is unaffected either way.
    pub fn discard_trial(&mut self) {
        self.pending = None;
    }

    pub fn is_trial_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Ratio of the pending trial, if any.
    pub fn trial_ratio(&self) -> Option<T> {
        self.pending.map(|trial| trial.ratio)
    }

    pub fn trial_row(&self) -> &[T] {
        self.trial_row.as_slice()
    }

    pub fn len(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn first_index(&self) -> usize {
        self.first_index
    }

    /// Matrix row holding particle `iel`.
    #[inline]
    pub fn row_of(&self, iel: usize) -> usize {
        debug_assert!(iel >= self.first_index && iel < self.first_index + self.len());
        iel - self.first_index
    }

    pub fn matrix(&self) -> &DMatrix<T> {
        &self.matrix
    }

    pub fn inverse(&self) -> &DMatrix<T> {
        &self.inverse
    }

    /// `log|det(M)|`
    pub fn log_value(&self) -> T {
        self.log_value
    }

    pub fn sign(&self) -> Sign {
        self.sign
    }

    /// Sign as an angle, `0` or `π`.
    pub fn phase(&self) -> T {
        self.sign.phase()
    }

    /// Largest entry of `|inverse * matrix - I|`.
    pub fn check_matrix(&self) -> T {
        identity_deviation(&self.inverse, &self.matrix)
    }
}

//! Dense LU factorization with partial pivoting, and the helpers the
//! determinant tracker uses to validate its inverse.

use std::ops::Mul;
use nalgebra::linalg::LU;
use nalgebra::{DMatrix, Dyn};
use rand::Rng;
use tracing::warn;
use crate::error::QmcError;
use super::{real, Real};

/// Sign of a real determinant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sign {
    Positive,
    Negative,
}

impl Sign {
    /// Sign of `x`; zero counts as positive.
    pub fn of<T: Real>(x: T) -> Self {
        if x < T::zero() { Sign::Negative } else { Sign::Positive }
    }

    pub fn flip(self) -> Self {
        match self {
            Sign::Positive => Sign::Negative,
            Sign::Negative => Sign::Positive,
        }
    }

    /// `+1` or `-1`.
    pub fn value<T: Real>(self) -> T {
        match self {
            Sign::Positive => T::one(),
            Sign::Negative => -T::one(),
        }
    }

    /// Angle encoding of the sign: `0` or `π`.
    pub fn phase<T: Real>(self) -> T {
        match self {
            Sign::Positive => T::zero(),
            Sign::Negative => T::pi(),
        }
    }
}

impl Mul for Sign {
    type Output = Sign;

    fn mul(self, rhs: Sign) -> Sign {
        if self == rhs { Sign::Positive } else { Sign::Negative }
    }
}

/// Caller-owned factorization state for `n x n` matrices.
///
/// Holds the LU decomposition of the last matrix passed to
/// [`factorize`](Self::factorize); nothing else in it is meaningful between
/// calls.
#[derive(Debug, Clone)]
pub struct LuWorkspace<T: Real> {
    n: usize,
    lu: Option<LU<T, Dyn, Dyn>>,
}

impl<T: Real> LuWorkspace<T> {
    pub fn new(n: usize) -> Self {
        Self { n, lu: None }
    }

    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// Factorize `matrix` as `P·A = L·U` and return `(log|det A|, sign(det A))`.
    ///
    /// The log-magnitude is summed over the pivots of `U` in elimination order.
    /// An exactly zero or non-finite pivot aborts with
    /// [`QmcError::SingularMatrix`] and leaves no factorization behind.
    pub fn factorize(&mut self, matrix: &DMatrix<T>) -> Result<(T, Sign), QmcError> {
        debug_assert_eq!(matrix.shape(), (self.n, self.n));
        self.lu = None;

        let lu = matrix.clone().lu();
        let pivots = lu.u().diagonal();
        let mut log_value = T::zero();
        let mut sign = Sign::of(lu.p().determinant::<T>());
        for (k, &pivot) in pivots.iter().enumerate() {
            if pivot == T::zero() || !pivot.is_finite() {
                warn!("LU factorization failed at pivot {} of {}", k, self.n);
                return Err(QmcError::SingularMatrix { pivot: k });
            }
            sign = sign * Sign::of(pivot);
            log_value += pivot.abs().ln();
        }

        self.lu = Some(lu);
        Ok((log_value, sign))
    }

    /// Write the inverse of the last factorized matrix into `inverse`.
    ///
    /// `inverse` is left untouched when there is no successful factorization.
    pub fn invert_into(&self, inverse: &mut DMatrix<T>) -> Result<(), QmcError> {
        debug_assert_eq!(inverse.shape(), (self.n, self.n));
        let lu = self.lu.as_ref().ok_or_else(|| {
            QmcError::InvalidParameter("inverse requested without a factorization".to_string())
        })?;
        if !lu.try_inverse_to(inverse) {
            return Err(QmcError::SingularMatrix { pivot: 0 });
        }
        Ok(())
    }
}

/// Largest entry of `|a·b - I|`.
pub fn identity_deviation<T: Real>(a: &DMatrix<T>, b: &DMatrix<T>) -> T {
    let product = a * b;
    let mut worst = T::zero();
    for j in 0..product.ncols() {
        for i in 0..product.nrows() {
            let expected = if i == j { T::one() } else { T::zero() };
            worst = worst.max((product[(i, j)] - expected).abs());
        }
    }
    worst
}

/// `n x n` matrix with entries drawn uniformly from `[-0.5, 0.5)`.
pub fn random_matrix<T: Real, R: Rng + ?Sized>(n: usize, rng: &mut R) -> DMatrix<T> {
    DMatrix::from_fn(n, n, |_, _| real(rng.gen::<f64>() - 0.5))
}

//! Compact limited-memory SR1 Hessian approximation.
//!
//! With `B0 = gamma I`, the SR1 matrix built from the pairs stacked in `S` and
//! `Y` is `B = B0 + Psi M^-1 Psi^T`, where `Psi = Y - gamma S` and
//! `M = L + L^T + gamma S^T S + D` (`D` the diagonal and `L` the strictly lower
//! triangle of `S^T Y`). A thin QR of `Psi` turns this into
//! `B = gamma I + P diag(lambda) P^T` with orthonormal `P`, which is what the
//! subproblem solvers work with.

use crate::linalg::{self, LinalgError};
use crate::memory::CurvaturePair;
use ndarray::{Array1, Array2};

/// Eigenvalues of `M` below this magnitude mark it as numerically singular.
const SINGULAR_EIGENVALUE: f64 = 1e-16;
/// Lower bound of the Barzilai-Borwein scaling.
const MIN_GAMMA: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum ModelError {
    /// `M` has an eigenvalue of magnitude below 1e-16 or could not be inverted.
    Singular { min_abs_eigenvalue: f64 },
    /// A factorization returned non-finite values.
    Decomposition(LinalgError),
}

impl std::fmt::Display for ModelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelError::Singular { min_abs_eigenvalue } => {
                write!(f, "singular middle matrix (min |eig| = {min_abs_eigenvalue:.3e})")
            }
            ModelError::Decomposition(err) => write!(f, "factorization failed: {err:?}"),
        }
    }
}

impl From<LinalgError> for ModelError {
    fn from(err: LinalgError) -> Self {
        match err {
            LinalgError::Singular => ModelError::Singular {
                min_abs_eigenvalue: 0.0,
            },
            LinalgError::NonFinite => ModelError::Decomposition(err),
        }
    }
}

/// Stabilized Barzilai-Borwein scaling from the newest pair:
/// `max(0.1, max(s.y / y.y, s.s / s.y))`.
///
/// Ratios with a zero denominator are skipped, so the result is always
/// finite and at least 0.1.
pub(crate) fn barzilai_borwein_gamma(pair: &CurvaturePair) -> f64 {
    let sy = pair.s.dot(&pair.y);
    let yy = pair.y.dot(&pair.y);
    let ss = pair.s.dot(&pair.s);
    [sy / yy, ss / sy]
        .into_iter()
        .filter(|v| v.is_finite())
        .fold(MIN_GAMMA, f64::max)
}

/// Implicit SR1 Hessian `B = gamma I + Psi M^-1 Psi^T = gamma I + P diag(lambda) P^T`.
///
/// Rebuilt from the memory contents every outer iteration; never updated in
/// place.
#[derive(Debug, Clone)]
pub struct HessianModel {
    gamma: f64,
    /// `Psi = Y - gamma S`, `n x k`.
    psi: Array2<f64>,
    /// Compact middle matrix `M`, `k x k`.
    compact: Array2<f64>,
    /// Orthonormal basis `P`, `n x min(n, k)`.
    basis: Array2<f64>,
    /// Eigenvalues of `R M^-1 R^T`, ascending, one per column of `P`.
    eigenvalues: Array1<f64>,
}

impl HessianModel {
    /// `B = gamma I` with no curvature history.
    pub fn scaled_identity(n: usize, gamma: f64) -> Self {
        Self {
            gamma,
            psi: Array2::zeros((n, 0)),
            compact: Array2::zeros((0, 0)),
            basis: Array2::zeros((n, 0)),
            eigenvalues: Array1::zeros(0),
        }
    }

    /// Builds the compact representation from `n x k` stacks `S`, `Y`.
    pub(crate) fn build(
        S: &Array2<f64>,
        Y: &Array2<f64>,
        gamma: f64,
    ) -> Result<Self, ModelError> {
        let (M, psi) = compact_matrices(S, Y, gamma);

        let m_eigenvalues = linalg::symmetric_eigen(&linalg::symmetrize(&M))?.0;
        let min_abs = m_eigenvalues
            .iter()
            .fold(f64::INFINITY, |acc, v| acc.min(v.abs()));
        if min_abs < SINGULAR_EIGENVALUE {
            return Err(ModelError::Singular {
                min_abs_eigenvalue: min_abs,
            });
        }

        let k = M.nrows();
        let M_inv = linalg::solve(&M, &Array2::eye(k)).map_err(|err| match err {
            LinalgError::Singular => ModelError::Singular {
                min_abs_eigenvalue: min_abs,
            },
            other => ModelError::Decomposition(other),
        })?;
        let (basis, eigenvalues) = decompose(&psi, &M_inv)?;
        Ok(Self {
            gamma,
            psi,
            compact: M,
            basis,
            eigenvalues,
        })
    }

    pub fn gamma(&self) -> f64 {
        self.gamma
    }

    pub fn psi(&self) -> &Array2<f64> {
        &self.psi
    }

    pub fn compact(&self) -> &Array2<f64> {
        &self.compact
    }

    pub fn basis(&self) -> &Array2<f64> {
        &self.basis
    }

    pub fn eigenvalues(&self) -> &Array1<f64> {
        &self.eigenvalues
    }

    /// Number of curvature pairs behind the model.
    pub fn len(&self) -> usize {
        self.psi.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.psi.ncols() == 0
    }

    /// `B v`.
    pub fn apply(&self, v: &Array1<f64>) -> Array1<f64> {
        let mut out = v * self.gamma;
        if !self.basis.is_empty() {
            let coords = self.basis.t().dot(v) * &self.eigenvalues;
            out += &self.basis.dot(&coords);
        }
        out
    }

    /// `v^T B v`, evaluated in the projected coordinates.
    pub fn quad_form(&self, v: &Array1<f64>) -> f64 {
        let mut q = self.gamma * v.dot(v);
        if !self.basis.is_empty() {
            let coords = self.basis.t().dot(v);
            q += coords
                .iter()
                .zip(self.eigenvalues.iter())
                .map(|(c, l)| l * c * c)
                .sum::<f64>();
        }
        q
    }
}

/// `M = L + L^T + gamma S^T S + D` and `Psi = Y - gamma S`.
pub(crate) fn compact_matrices(
    S: &Array2<f64>,
    Y: &Array2<f64>,
    gamma: f64,
) -> (Array2<f64>, Array2<f64>) {
    let psi = Y - &(S * gamma);
    let SY = S.t().dot(Y);
    let SS = S.t().dot(S);
    let k = SY.nrows();
    let mut M = Array2::<f64>::zeros((k, k));
    for i in 0..k {
        for j in 0..k {
            let l_part = if i > j {
                SY[[i, j]]
            } else if j > i {
                SY[[j, i]]
            } else {
                SY[[i, i]]
            };
            M[[i, j]] = l_part + gamma * SS[[i, j]];
        }
    }
    (M, psi)
}

/// Thin QR of `Psi`, then the eigenpairs of the symmetrized `R M^-1 R^T`.
/// Returns `P = Q U` and the eigenvalues (ascending).
pub(crate) fn decompose(
    psi: &Array2<f64>,
    M_inv: &Array2<f64>,
) -> Result<(Array2<f64>, Array1<f64>), ModelError> {
    let (Q, R) = linalg::thin_qr(psi)?;
    let RMR = linalg::symmetrize(&R.dot(M_inv).dot(&R.t()));
    let (lambda, U) = linalg::symmetric_eigen(&RMR)?;
    Ok((Q.dot(&U), lambda))
}

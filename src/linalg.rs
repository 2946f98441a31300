//! Dense factorizations for the small compact matrices.
//!
//! Vectors and column stacks stay in `ndarray`; the few decompositions the
//! compact SR1 model needs (symmetric eigen, thin QR, LU solve) are delegated
//! to `nalgebra` through the conversions below. None of these matrices is
//! wider than the history length.

use nalgebra::{DMatrix, SymmetricEigen};
use ndarray::{Array1, Array2};

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum LinalgError {
    /// The LU factorization met an exactly zero pivot.
    Singular,
    /// A factorization produced NaN or infinity.
    NonFinite,
}

fn to_dmatrix(a: &Array2<f64>) -> DMatrix<f64> {
    DMatrix::from_fn(a.nrows(), a.ncols(), |i, j| a[[i, j]])
}

fn from_dmatrix(m: &DMatrix<f64>) -> Array2<f64> {
    Array2::from_shape_fn((m.nrows(), m.ncols()), |(i, j)| m[(i, j)])
}

/// Returns `(A + A^T) / 2`.
pub(crate) fn symmetrize(a: &Array2<f64>) -> Array2<f64> {
    (a + &a.t()) * 0.5
}

/// Eigen-decomposition of a real symmetric matrix.
///
/// Eigenpairs are sorted by ascending eigenvalue; eigenvectors are the
/// columns of the returned matrix.
pub(crate) fn symmetric_eigen(a: &Array2<f64>) -> Result<(Array1<f64>, Array2<f64>), LinalgError> {
    let n = a.nrows();
    if n == 0 {
        return Ok((Array1::zeros(0), Array2::zeros((0, 0))));
    }
    let eig = SymmetricEigen::new(to_dmatrix(a));
    if eig.eigenvalues.iter().any(|v| !v.is_finite())
        || eig.eigenvectors.iter().any(|v| !v.is_finite())
    {
        return Err(LinalgError::NonFinite);
    }
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| eig.eigenvalues[i].total_cmp(&eig.eigenvalues[j]));
    let values = Array1::from_iter(order.iter().map(|&i| eig.eigenvalues[i]));
    let vectors = Array2::from_shape_fn((n, n), |(r, c)| eig.eigenvectors[(r, order[c])]);
    Ok((values, vectors))
}

/// Reduced QR factorization: for an `n x k` input returns `Q` (`n x min(n, k)`,
/// orthonormal columns) and `R` (`min(n, k) x k`, upper triangular).
pub(crate) fn thin_qr(a: &Array2<f64>) -> Result<(Array2<f64>, Array2<f64>), LinalgError> {
    let qr = to_dmatrix(a).qr();
    let q = from_dmatrix(&qr.q());
    let r = from_dmatrix(&qr.r());
    if q.iter().chain(r.iter()).any(|v| !v.is_finite()) {
        return Err(LinalgError::NonFinite);
    }
    Ok((q, r))
}

/// Solves `A X = B` by LU with partial pivoting.
pub(crate) fn solve(a: &Array2<f64>, b: &Array2<f64>) -> Result<Array2<f64>, LinalgError> {
    let lu = to_dmatrix(a).lu();
    let x = lu.solve(&to_dmatrix(b)).ok_or(LinalgError::Singular)?;
    if x.iter().any(|v| !v.is_finite()) {
        return Err(LinalgError::NonFinite);
    }
    Ok(from_dmatrix(&x))
}

/// Solves `A x = b` for a single right-hand side.
pub(crate) fn solve_vec(a: &Array2<f64>, b: &Array1<f64>) -> Result<Array1<f64>, LinalgError> {
    let rhs = b.view().insert_axis(ndarray::Axis(1)).to_owned();
    let x = solve(a, &rhs)?;
    Ok(x.column(0).to_owned())
}

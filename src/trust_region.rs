//! Trust-region subproblem solvers.
//!
//! Every solver approximately minimizes the quadratic model
//! `m(p) = g.p + 1/2 p^T B p` subject to `||p|| <= radius`, where `B` is the
//! compact SR1 matrix held by [`HessianModel`].

use crate::Lsr1Error;
use crate::hessian::{HessianModel, ModelError};
use crate::linalg;
use ndarray::{Array1, Axis};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Magnitudes at or below this are treated as zero by the OBS solver.
const OBS_TOL: f64 = 1e-10;
/// Newton on the secular equation stops once `|phi|` falls to this value.
const NEWTON_TOL: f64 = 1e-15;

/// Which subproblem solver drives the step.
///
/// Serialized under the names accepted by [`FromStr`]: `"OBS"`,
/// `"Cauchy_Point_Calculation"` and `"Steihaug_cg"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TrustSolver {
    /// Orthonormal-basis SR1 method: exact solution through the spectral
    /// form of `B` and Newton on the secular equation.
    #[default]
    Obs,
    /// Steepest-descent step clipped to the region.
    CauchyPoint,
    /// Truncated conjugate gradients.
    SteihaugCg,
}

impl TrustSolver {
    pub fn name(self) -> &'static str {
        match self {
            TrustSolver::Obs => "OBS",
            TrustSolver::CauchyPoint => "Cauchy_Point_Calculation",
            TrustSolver::SteihaugCg => "Steihaug_cg",
        }
    }
}

impl fmt::Display for TrustSolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<String> for TrustSolver {
    type Error = Lsr1Error;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        name.parse()
    }
}

impl From<TrustSolver> for String {
    fn from(solver: TrustSolver) -> Self {
        solver.name().to_string()
    }
}

impl FromStr for TrustSolver {
    type Err = Lsr1Error;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name {
            "OBS" => Ok(TrustSolver::Obs),
            "Cauchy" | "Cauchy_Point_Calculation" => Ok(TrustSolver::CauchyPoint),
            "SteihaugCG" | "Steihaug_cg" => Ok(TrustSolver::SteihaugCg),
            other => Err(Lsr1Error::UnknownTrustSolver(other.to_string())),
        }
    }
}

/// Iteration caps for the iterative solvers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SolverLimits {
    pub newton_maxit: usize,
    pub cg_iter: usize,
}

impl Default for SolverLimits {
    fn default() -> Self {
        Self {
            newton_maxit: 5,
            cg_iter: 1000,
        }
    }
}

/// Solves the subproblem with the chosen method. A zero gradient gives a zero
/// step. Errors only come from the Woodbury solve of the OBS method.
pub(crate) fn solve(
    solver: TrustSolver,
    model: &HessianModel,
    g: &Array1<f64>,
    radius: f64,
    limits: SolverLimits,
) -> Result<Array1<f64>, ModelError> {
    let g_norm = norm(g);
    if g_norm == 0.0 {
        return Ok(Array1::zeros(g.len()));
    }
    match solver {
        TrustSolver::CauchyPoint => Ok(cauchy_point(model, g, g_norm, radius)),
        TrustSolver::SteihaugCg => Ok(steihaug_cg(model, g, g_norm, radius, limits.cg_iter)),
        TrustSolver::Obs => obs(model, g, radius, limits.newton_maxit),
    }
}

#[inline]
fn norm(v: &Array1<f64>) -> f64 {
    v.dot(v).sqrt()
}

fn cauchy_point(model: &HessianModel, g: &Array1<f64>, g_norm: f64, radius: f64) -> Array1<f64> {
    let gBg = model.quad_form(g);
    let tau = if gBg <= 0.0 {
        1.0
    } else {
        (g_norm.powi(3) / (radius * gBg)).min(1.0)
    };
    g * (-tau * radius / g_norm)
}

/// Positive root `tau` of `||z + tau d|| = radius`.
fn boundary_root(z: &Array1<f64>, d: &Array1<f64>, radius: f64) -> f64 {
    let dd = d.dot(d);
    let dz = d.dot(z);
    let zz = z.dot(z);
    let disc = (dz * dz - dd * (zz - radius * radius)).max(0.0);
    (-dz + disc.sqrt()) / dd
}

fn steihaug_cg(
    model: &HessianModel,
    g: &Array1<f64>,
    g_norm: f64,
    radius: f64,
    cg_iter: usize,
) -> Array1<f64> {
    if model.quad_form(g) <= 0.0 {
        return g * (-radius / g_norm);
    }
    let tol = 0.5_f64.min(g_norm.sqrt()) * g_norm;
    let mut z = Array1::<f64>::zeros(g.len());
    let mut r = g.clone();
    let mut d = -g;
    for iter in 0..cg_iter {
        let bd = model.apply(&d);
        let dBd = d.dot(&bd);
        if dBd <= 0.0 {
            log::debug!("[LSR1] steihaug: negative curvature at cg iteration {}", iter);
            let tau = boundary_root(&z, &d, radius);
            return &z + &(&d * tau);
        }
        let rr = r.dot(&r);
        let alpha = rr / dBd;
        let z_next = &z + &(&d * alpha);
        if norm(&z_next) >= radius {
            let tau = boundary_root(&z, &d, radius);
            return &z + &(&d * tau);
        }
        r.scaled_add(alpha, &bd);
        if norm(&r) < tol {
            return z_next;
        }
        let beta = r.dot(&r) / rr;
        d = &d * beta - &r;
        z = z_next;
    }
    z
}

/// Secular function of the OBS method on the spectral coordinates
/// `a = [P^T g, ||g_perp||]` and shifted eigenvalues `lam = [lambda + gamma, gamma]`.
struct Secular<'a> {
    a: &'a Array1<f64>,
    lam: &'a Array1<f64>,
    radius: f64,
}

impl Secular<'_> {
    /// `phi(sigma) = 1/||a / (lam + sigma)|| - 1/radius` and its derivative.
    fn eval(&self, sigma: f64) -> (f64, f64) {
        let mut norm2 = 0.0;
        let mut cubic = 0.0;
        for (&a_i, &l_i) in self.a.iter().zip(self.lam.iter()) {
            if a_i.abs() <= OBS_TOL {
                continue;
            }
            let t = l_i + sigma;
            if t.abs() <= OBS_TOL {
                return (-1.0 / self.radius, 1.0 / OBS_TOL);
            }
            norm2 += (a_i / t).powi(2);
            cubic += a_i * a_i / t.powi(3);
        }
        let step_norm = norm2.sqrt();
        (1.0 / step_norm - 1.0 / self.radius, cubic / step_norm.powi(3))
    }

    fn phi(&self, sigma: f64) -> f64 {
        self.eval(sigma).0
    }

    /// Newton iteration on `phi(sigma) = 0`. Iterates that would cross
    /// `lower` are replaced by the midpoint towards it.
    fn newton(&self, start: f64, lower: f64, maxit: usize) -> f64 {
        let mut sigma = start;
        let (mut phi, mut dphi) = self.eval(sigma);
        let mut iter = 0;
        while phi.abs() > NEWTON_TOL && iter < maxit {
            if !phi.is_finite() || !dphi.is_finite() || dphi == 0.0 {
                break;
            }
            let next = sigma - phi / dphi;
            sigma = if next > lower { next } else { 0.5 * (lower + sigma) };
            (phi, dphi) = self.eval(sigma);
            iter += 1;
        }
        sigma
    }
}

fn obs(
    model: &HessianModel,
    g: &Array1<f64>,
    radius: f64,
    newton_maxit: usize,
) -> Result<Array1<f64>, ModelError> {
    let gamma = model.gamma();
    let P = model.basis();
    let m = P.ncols();

    let mut lam = Array1::<f64>::zeros(m + 1);
    for (i, l) in model.eigenvalues().iter().enumerate() {
        lam[i] = l + gamma;
    }
    lam[m] = gamma;
    lam.mapv_inplace(|v| if v.abs() > OBS_TOL { v } else { 0.0 });
    let lam_min = lam.fold(f64::INFINITY, |acc, &v| acc.min(v));

    let g_par = P.t().dot(g);
    let perp_sq = (g.dot(g) - g_par.dot(&g_par)).abs();
    let mut a = Array1::<f64>::zeros(m + 1);
    a.slice_mut(ndarray::s![..m]).assign(&g_par);
    a[m] = if perp_sq < OBS_TOL { 0.0 } else { perp_sq.sqrt() };

    let secular = Secular {
        a: &a,
        lam: &lam,
        radius,
    };

    if lam_min > 0.0 && secular.phi(0.0) >= 0.0 {
        return woodbury_step(model, g, gamma);
    }

    if lam_min <= 0.0 && secular.phi(-lam_min) >= 0.0 {
        let sigma = -lam_min;
        let p = pseudo_inverse_step(model, g, &g_par, &a, &lam, sigma);
        if lam_min < 0.0 {
            return Ok(hard_case_extension(model, p, &lam, lam_min, radius));
        }
        return Ok(p);
    }

    let sigma = if lam_min > 0.0 {
        secular.newton(0.0, 0.0, newton_maxit)
    } else {
        let sigma_hat = a
            .iter()
            .zip(lam.iter())
            .map(|(a_i, l_i)| a_i.abs() / radius - l_i)
            .fold(f64::NEG_INFINITY, f64::max);
        secular.newton(sigma_hat.max(-lam_min), -lam_min, newton_maxit)
    };
    woodbury_step(model, g, sigma + gamma)
}

/// `p = -(B + sigma I)^-1 g` through the Sherman-Morrison-Woodbury identity,
/// with `tau = gamma + sigma`.
fn woodbury_step(
    model: &HessianModel,
    g: &Array1<f64>,
    tau: f64,
) -> Result<Array1<f64>, ModelError> {
    if model.is_empty() {
        return Ok(g.mapv(|v| -v / tau));
    }
    let psi = model.psi();
    let system = model.compact() * tau + psi.t().dot(psi);
    let z = linalg::solve_vec(&system, &psi.t().dot(g))?;
    Ok((g - &psi.dot(&z)) * (-1.0 / tau))
}

/// Minimum-norm step at `sigma = -lambda_min` using the pseudo-inverse of
/// `B + sigma I`.
fn pseudo_inverse_step(
    model: &HessianModel,
    g: &Array1<f64>,
    g_par: &Array1<f64>,
    a: &Array1<f64>,
    lam: &Array1<f64>,
    sigma: f64,
) -> Array1<f64> {
    let P = model.basis();
    let m = P.ncols();
    let v = Array1::from_shape_fn(m, |i| {
        let t = lam[i] + sigma;
        if t.abs() > OBS_TOL { a[i] / t } else { 0.0 }
    });
    let mut p = -P.dot(&v);
    let shift = model.gamma() + sigma;
    if shift.abs() >= OBS_TOL {
        let complement = g - &P.dot(g_par);
        p.scaled_add(-1.0 / shift, &complement);
    }
    p
}

/// Hard case: moves `p` to the boundary along an eigenvector of the most
/// negative eigenvalue.
fn hard_case_extension(
    model: &HessianModel,
    p: Array1<f64>,
    lam: &Array1<f64>,
    lam_min: f64,
    radius: f64,
) -> Array1<f64> {
    let alpha = (radius * radius - p.dot(&p)).max(0.0).sqrt();
    match min_eigen_direction(model, lam, lam_min) {
        Some(u) => p + u * alpha,
        None => {
            log::debug!("[LSR1] obs hard case: no direction outside the basis, step kept");
            p
        }
    }
}

fn min_eigen_direction(
    model: &HessianModel,
    lam: &Array1<f64>,
    lam_min: f64,
) -> Option<Array1<f64>> {
    let P = model.basis();
    let (n, m) = P.dim();
    if let Some(i) = (0..m).find(|&i| (lam[i] - lam_min).abs() < OBS_TOL) {
        let col = P.column(i).to_owned();
        let len = norm(&col);
        return (len > 0.0).then(|| col / len);
    }
    // The minimum lives on the gamma complement; Gram-Schmidt a unit vector
    // against the basis.
    (0..n.min(m + 1)).find_map(|j| {
        let mut u = -P.dot(&P.index_axis(Axis(0), j));
        u[j] += 1.0;
        let len = norm(&u);
        (len > OBS_TOL).then(|| u / len)
    })
}

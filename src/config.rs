//! Hyperparameters of the optimizer.

use crate::Lsr1Error;
use crate::line_search::WolfeParams;
use crate::trust_region::{SolverLimits, TrustSolver};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Line search used to scale the trust-region direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum LineSearchKind {
    StrongWolfe,
}

impl fmt::Display for LineSearchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LineSearchKind::StrongWolfe => f.write_str("strong_wolfe"),
        }
    }
}

impl FromStr for LineSearchKind {
    type Err = Lsr1Error;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name {
            "strong_wolfe" => Ok(LineSearchKind::StrongWolfe),
            other => Err(Lsr1Error::UnsupportedLineSearch(other.to_string())),
        }
    }
}

impl TryFrom<String> for LineSearchKind {
    type Error = Lsr1Error;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        name.parse()
    }
}

impl From<LineSearchKind> for String {
    fn from(kind: LineSearchKind) -> Self {
        kind.to_string()
    }
}

/// Configuration of [`Lsr1`](crate::Lsr1).
///
/// Missing fields take their defaults when deserializing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Lsr1Config {
    /// Step scale (default: 1).
    pub lr: f64,
    /// Outer iterations per `step()` call (default: 20).
    pub max_iter: usize,
    /// Convergence threshold on `||g||_inf` (default: 1e-15).
    pub tolerance_grad: f64,
    /// Minimum loss change before a restart is forced (default: 1e-15).
    pub tolerance_change: f64,
    /// Initial trust radius (default: 0.00075).
    pub tr_radius: f64,
    /// Number of curvature pairs kept (default: 3).
    pub memory_size: usize,
    /// Momentum decay in `[0, 1)` (default: 0.75).
    pub mu: f64,
    /// Momentum blend in `[0, 1)` (default: 0.75).
    pub nu: f64,
    /// Gradient weight of the momentum term in `[0, 1]` (default: 0).
    pub alpha_s: f64,
    /// Newton iterations of the OBS secular solve (default: 5).
    pub newton_maxit: usize,
    /// Iteration cap of Steihaug-CG (default: 1000).
    pub cg_iter: usize,
    /// `None` applies `lr * d` directly (default: strong Wolfe).
    pub line_search: Option<LineSearchKind>,
    /// Subproblem solver (default: OBS).
    pub trust_solver: TrustSolver,
    pub wolfe: WolfeParams,
}

impl Default for Lsr1Config {
    fn default() -> Self {
        Self {
            lr: 1.0,
            max_iter: 20,
            tolerance_grad: 1e-15,
            tolerance_change: 1e-15,
            tr_radius: 0.00075,
            memory_size: 3,
            mu: 0.75,
            nu: 0.75,
            alpha_s: 0.0,
            newton_maxit: 5,
            cg_iter: 1000,
            line_search: Some(LineSearchKind::StrongWolfe),
            trust_solver: TrustSolver::Obs,
            wolfe: WolfeParams::default(),
        }
    }
}

fn ensure(name: &'static str, value: f64, ok: bool) -> Result<(), Lsr1Error> {
    if ok {
        Ok(())
    } else {
        Err(Lsr1Error::InvalidHyperparameter { name, value })
    }
}

impl Lsr1Config {
    /// Checks every hyperparameter against its admissible range.
    pub fn validate(&self) -> Result<(), Lsr1Error> {
        ensure("lr", self.lr, self.lr > 0.0 && self.lr.is_finite())?;
        ensure("max_iter", self.max_iter as f64, self.max_iter >= 1)?;
        ensure("memory_size", self.memory_size as f64, self.memory_size >= 1)?;
        ensure(
            "tr_radius",
            self.tr_radius,
            self.tr_radius > 0.0 && self.tr_radius.is_finite(),
        )?;
        ensure("tolerance_grad", self.tolerance_grad, self.tolerance_grad >= 0.0)?;
        ensure("tolerance_change", self.tolerance_change, self.tolerance_change >= 0.0)?;
        ensure("mu", self.mu, (0.0..1.0).contains(&self.mu))?;
        ensure("nu", self.nu, (0.0..1.0).contains(&self.nu))?;
        ensure("alpha_s", self.alpha_s, (0.0..=1.0).contains(&self.alpha_s))?;
        ensure("cg_iter", self.cg_iter as f64, self.cg_iter >= 1)?;
        let WolfeParams { c1, c2, max_ls, .. } = self.wolfe;
        ensure("c1", c1, c1 > 0.0 && c1 < c2)?;
        ensure("c2", c2, c2 > c1 && c2 < 1.0)?;
        ensure("max_ls", max_ls as f64, max_ls >= 1)?;
        Ok(())
    }

    pub(crate) fn solver_limits(&self) -> SolverLimits {
        SolverLimits {
            newton_maxit: self.newton_maxit,
            cg_iter: self.cg_iter,
        }
    }
}

//! A limited-memory SR1 (LSR1) trust-region optimizer.
#![allow(non_snake_case)]
//!
//! The curvature model is the compact SR1 representation
//! `B = gamma I + Psi M^-1 Psi^T` built from the last few curvature pairs
//! `(s, y)`. Each outer iteration solves the trust-region subproblem on that
//! model, blends the result with a momentum buffer, scales the direction with
//! a strong Wolfe line search (or a fixed step) and adapts the trust radius
//! from smoothed actual/predicted reduction ratios. See Nocedal & Wright,
//! "Numerical Optimization", chapters 4, 6 and 7, and Brust, Erway & Marcia,
//! "On solving L-SR1 trust-region subproblems".
//!
//! # Features
//! - Three subproblem solvers: the orthonormal basis SR1 method (OBS, with
//!   hard-case handling), the Cauchy point and truncated Steihaug-CG.
//! - Strong Wolfe line search with cubic interpolation and zoom.
//! - Momentum blending of consecutive steps, clipped to the trust region.
//! - Numerical breakdowns end the call with a restart instead of an error;
//!   the next call starts over with a scaled gradient step.
//! - Serializable configuration and state, so runs can be checkpointed and
//!   resumed.
//!
//! ## Defaults (key settings)
//! - `lr = 1`, `max_iter = 20`, `tolerance_grad = tolerance_change = 1e-15`.
//! - Trust region: `tr_radius = 0.00075`, OBS solver, `newton_maxit = 5`.
//! - Memory: 3 curvature pairs.
//! - Momentum: `mu = nu = 0.75`, `alpha_s = 0`.
//! - Line search: strong Wolfe, `c1 = 1e-4`, `c2 = 0.9`, `max_ls = 25`.
//!
//! # Example
//!
//! Drive the Rosenbrock function downhill with repeated `step()` calls.
//!
//! ```
//! use lsr1::{ClosureOracle, Lsr1, TrustSolver};
//! use ndarray::{array, Array1};
//!
//! let rosenbrock = |x: &Array1<f64>| -> (f64, Array1<f64>) {
//!     let a = 1.0;
//!     let b = 100.0;
//!     let f = (a - x[0]).powi(2) + b * (x[1] - x[0].powi(2)).powi(2);
//!     let g = array![
//!         -2.0 * (a - x[0]) - 4.0 * b * (x[1] - x[0].powi(2)) * x[0],
//!         2.0 * b * (x[1] - x[0].powi(2)),
//!     ];
//!     (f, g)
//! };
//!
//! let mut oracle = ClosureOracle::new(array![-1.2, 1.0], rosenbrock);
//! let mut optimizer = Lsr1::new()
//!     .with_trust_solver(TrustSolver::Obs)
//!     .with_tr_radius(0.5)
//!     .with_momentum(0.0, 0.0, 0.0);
//!
//! let start = 24.2;
//! let mut loss = start;
//! for _ in 0..10 {
//!     let outcome = optimizer.step(&mut oracle).expect("LSR1 step failed");
//!     loss = outcome.loss;
//!     if outcome.converged() {
//!         break;
//!     }
//! }
//!
//! println!("f({}) = {:.4} after {} evaluations.", oracle.x(), loss, oracle.evals());
//! assert!(loss < start);
//! ```

mod config;
mod hessian;
mod line_search;
mod linalg;
mod memory;
mod optimizer;
mod oracle;
mod radius;
mod state;
mod trust_region;

pub use config::{LineSearchKind, Lsr1Config};
pub use hessian::HessianModel;
pub use line_search::{LineSearchResult, WolfeParams, strong_wolfe};
pub use memory::{CURVATURE_THRESHOLD, CurvaturePair, Sr1Memory};
pub use optimizer::{Lsr1, RestartReason, StepOutcome, Termination};
pub use oracle::{BlockOracle, ClosureOracle, Oracle};
pub use radius::TrustRegionState;
pub use state::Lsr1State;
pub use trust_region::{SolverLimits, TrustSolver};

/// Errors that stop a `step()` call before it touches the parameters.
///
/// Numerical breakdowns inside an iteration are not errors; they are
/// reported through [`Termination::Restarted`].
#[derive(Debug, thiserror::Error)]
pub enum Lsr1Error {
    #[error(
        "Unknown trust-region solver '{0}'. Expected one of OBS, Cauchy_Point_Calculation or Steihaug_cg."
    )]
    UnknownTrustSolver(String),
    #[error("Unsupported line search '{0}'. Only 'strong_wolfe' is available.")]
    UnsupportedLineSearch(String),
    #[error("The host exposes {0} parameter groups; LSR1 supports exactly one.")]
    MultipleParameterGroups(usize),
    #[error("Hyperparameter '{name}' has an invalid value {value}.")]
    InvalidHyperparameter {
        /// Name of the offending field of [`Lsr1Config`].
        name: &'static str,
        value: f64,
    },
    #[error(
        "The stored optimizer state has dimension {found}, but the parameters have dimension {expected}."
    )]
    DimensionMismatch { expected: usize, found: usize },
    #[error("The loss or gradient at the starting point was NaN or infinity.")]
    NonFiniteEvaluation,
}

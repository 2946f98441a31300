//! The LSR1 step controller.

use crate::config::{LineSearchKind, Lsr1Config};
use crate::hessian::{HessianModel, barzilai_borwein_gamma};
use crate::line_search::{self, WolfeParams};
use crate::oracle::Oracle;
use crate::radius::TrustRegionState;
use crate::state::Lsr1State;
use crate::trust_region::{self, TrustSolver};
use crate::Lsr1Error;
use ndarray::Array1;

/// Directions whose gradient correlation falls below this fraction of `||g||`
/// are treated as orthogonal to the gradient.
const ORTHOGONALITY_TOL: f64 = 5e-10;
/// Accepted range for line search steps and gradient norms.
const STEP_RANGE: std::ops::RangeInclusive<f64> = 1e-12..=1e6;
/// Line search results with a larger loss are rejected.
const MAX_LOSS: f64 = 1e6;

/// Why a call ended early and scheduled a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartReason {
    /// The compact middle matrix could not be inverted.
    SingularModel,
    /// The search direction was (nearly) orthogonal to the gradient.
    OrthogonalDirection,
    /// The line search returned a step, loss or gradient out of range.
    LineSearchRejected,
    /// A fixed step led to a non-finite loss; the parameters were restored.
    NonFiniteLoss,
    /// The curvature history is empty after the pair update.
    EmptyMemory,
    /// The loss changed by less than `tolerance_change`.
    InsufficientProgress,
}

/// How a `step()` call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// `||g||_inf <= tolerance_grad`.
    Converged,
    /// All `max_iter` iterations ran.
    MaxIterations,
    /// A numerical safeguard fired; the next call starts with a gradient step.
    Restarted(RestartReason),
}

/// Summary of one `step()` call.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    /// Loss at the point the call started from.
    pub initial_loss: f64,
    /// Last evaluated loss.
    pub loss: f64,
    /// Outer iterations started.
    pub iterations: usize,
    /// Oracle evaluations, including the one at entry.
    pub func_evals: usize,
    pub termination: Termination,
    /// Trust radius carried to the next call.
    pub trust_radius: f64,
}

impl StepOutcome {
    pub fn converged(&self) -> bool {
        self.termination == Termination::Converged
    }
}

/// Limited-memory SR1 trust-region optimizer.
///
/// Holds only configuration and optimizer state; parameters live in the
/// [`Oracle`] passed to [`Lsr1::step`].
#[derive(Debug, Clone)]
pub struct Lsr1 {
    config: Lsr1Config,
    state: Lsr1State,
}

impl Default for Lsr1 {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
fn norm(v: &Array1<f64>) -> f64 {
    v.dot(v).sqrt()
}

#[inline]
fn inf_norm(v: &Array1<f64>) -> f64 {
    v.fold(0.0_f64, |acc, x| acc.max(x.abs()))
}

/// Scales `v` onto the ball of radius `radius` if it lies outside.
fn clip_to_radius(v: &mut Array1<f64>, radius: f64) {
    let len = norm(v);
    if len > 0.0 {
        *v *= (radius / len).min(1.0);
    }
}

fn force_restart(state: &mut Lsr1State, reason: RestartReason, n_iter: usize) -> Termination {
    log::warn!("[LSR1] Iteration {}: {:?}, restarting with a gradient step.", n_iter, reason);
    state.restart = true;
    Termination::Restarted(reason)
}

impl Lsr1 {
    /// Creates an optimizer with the default configuration.
    pub fn new() -> Self {
        let config = Lsr1Config::default();
        let state = Lsr1State::new(config.memory_size);
        Self { config, state }
    }

    /// Creates an optimizer from a configuration, validating it first.
    pub fn from_config(config: Lsr1Config) -> Result<Self, Lsr1Error> {
        config.validate()?;
        let state = Lsr1State::new(config.memory_size);
        Ok(Self { config, state })
    }

    /// Sets the step scale (default: 1).
    pub fn with_lr(mut self, lr: f64) -> Self {
        self.config.lr = lr;
        self
    }

    /// Sets the number of outer iterations per call (default: 20).
    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.config.max_iter = max_iter;
        self
    }

    /// Sets the `||g||_inf` convergence threshold (default: 1e-15).
    pub fn with_tolerance_grad(mut self, tolerance_grad: f64) -> Self {
        self.config.tolerance_grad = tolerance_grad;
        self
    }

    /// Sets the minimum loss change per iteration (default: 1e-15).
    pub fn with_tolerance_change(mut self, tolerance_change: f64) -> Self {
        self.config.tolerance_change = tolerance_change;
        self
    }

    /// Sets the initial trust radius (default: 0.00075). Only used until the
    /// first call has stored a radius.
    pub fn with_tr_radius(mut self, tr_radius: f64) -> Self {
        self.config.tr_radius = tr_radius;
        self
    }

    /// Sets the number of curvature pairs kept (default: 3).
    pub fn with_memory_size(mut self, memory_size: usize) -> Self {
        self.config.memory_size = memory_size;
        self.state.memory.set_capacity(memory_size);
        self
    }

    /// Sets the momentum parameters `mu`, `nu` (default: 0.75 each) and
    /// `alpha_s` (default: 0).
    pub fn with_momentum(mut self, mu: f64, nu: f64, alpha_s: f64) -> Self {
        self.config.mu = mu;
        self.config.nu = nu;
        self.config.alpha_s = alpha_s;
        self
    }

    /// Sets the Newton iteration cap of the OBS solver (default: 5).
    pub fn with_newton_maxit(mut self, newton_maxit: usize) -> Self {
        self.config.newton_maxit = newton_maxit;
        self
    }

    /// Sets the iteration cap of Steihaug-CG (default: 1000).
    pub fn with_cg_iter(mut self, cg_iter: usize) -> Self {
        self.config.cg_iter = cg_iter;
        self
    }

    /// Chooses the line search; `None` takes fixed steps of `lr`
    /// (default: strong Wolfe).
    pub fn with_line_search(mut self, line_search: Option<LineSearchKind>) -> Self {
        self.config.line_search = line_search;
        self
    }

    /// Chooses the trust-region subproblem solver (default: OBS).
    pub fn with_trust_solver(mut self, trust_solver: TrustSolver) -> Self {
        self.config.trust_solver = trust_solver;
        self
    }

    pub fn with_wolfe(mut self, wolfe: WolfeParams) -> Self {
        self.config.wolfe = wolfe;
        self
    }

    pub fn config(&self) -> &Lsr1Config {
        &self.config
    }

    pub fn state(&self) -> &Lsr1State {
        &self.state
    }

    /// Replaces the optimizer state, e.g. from a checkpoint.
    pub fn load_state(&mut self, state: Lsr1State) {
        self.state = state;
    }

    /// Forgets all history; the next call starts like the first one.
    pub fn reset(&mut self) {
        self.state = Lsr1State::new(self.config.memory_size);
    }

    /// Runs up to `max_iter` outer iterations on the oracle's parameters.
    ///
    /// Numerical breakdowns end the call early with
    /// [`Termination::Restarted`] and are never errors. Errors are reserved
    /// for an invalid configuration, an unsupported host, state that does not
    /// fit the problem, and a non-finite evaluation at entry.
    pub fn step<O>(&mut self, oracle: &mut O) -> Result<StepOutcome, Lsr1Error>
    where
        O: Oracle + ?Sized,
    {
        self.config.validate()?;
        let groups = oracle.parameter_groups();
        if groups != 1 {
            return Err(Lsr1Error::MultipleParameterGroups(groups));
        }

        let (mut loss, mut g) = oracle.evaluate();
        let mut func_evals = 1;
        let n = oracle.point().len();
        if g.len() != n {
            return Err(Lsr1Error::DimensionMismatch {
                expected: n,
                found: g.len(),
            });
        }
        if !loss.is_finite() || g.iter().any(|v| !v.is_finite()) {
            return Err(Lsr1Error::NonFiniteEvaluation);
        }
        let initial_loss = loss;

        let cfg = &self.config;
        let state = &mut self.state;
        if inf_norm(&g) <= cfg.tolerance_grad {
            log::info!("[LSR1] Converged at entry: ||g||_inf = {:.3e}.", inf_norm(&g));
            return Ok(StepOutcome {
                initial_loss,
                loss,
                iterations: 0,
                func_evals,
                termination: Termination::Converged,
                trust_radius: state.trust.map_or(cfg.tr_radius, |t| t.radius),
            });
        }
        if !state.restart {
            if let Some(found) = state.mismatched_dim(n) {
                return Err(Lsr1Error::DimensionMismatch { expected: n, found });
            }
        }
        if state.memory.capacity() != cfg.memory_size {
            state.memory.set_capacity(cfg.memory_size);
        }

        let limits = cfg.solver_limits();
        let mut trust = state
            .trust
            .unwrap_or_else(|| TrustRegionState::new(cfg.tr_radius));
        let mut v = state.v.take().unwrap_or_else(|| Array1::zeros(n));
        let mut s = state.s.take().unwrap_or_else(|| Array1::zeros(n));
        let mut y = state.y.take().unwrap_or_else(|| Array1::zeros(n));
        let mut d = state.direction.take().unwrap_or_else(|| Array1::zeros(n));
        let mut alpha = state.alpha;
        let mut termination = Termination::MaxIterations;
        let mut iterations = 0;

        for n_iter in 1..=cfg.max_iter {
            iterations = n_iter;
            let restarting = state.restart;

            // Model and trust-region direction.
            let model = if restarting {
                state.restart = false;
                state.memory.clear();
                v = Array1::zeros(n);
                s = Array1::zeros(n);
                y = Array1::zeros(n);
                trust.reset_smoothing();
                d = -&g;
                HessianModel::scaled_identity(n, 1.0)
            } else {
                let (Some((S, Y)), Some(newest)) = (state.memory.matrices(), state.memory.latest())
                else {
                    termination = force_restart(state, RestartReason::EmptyMemory, n_iter);
                    break;
                };
                let gamma = barzilai_borwein_gamma(newest);
                let model = match HessianModel::build(&S, &Y, gamma) {
                    Ok(model) => model,
                    Err(err) => {
                        log::debug!("[LSR1] Model construction failed: {}", err);
                        termination = force_restart(state, RestartReason::SingularModel, n_iter);
                        break;
                    }
                };
                match trust_region::solve(cfg.trust_solver, &model, &g, trust.radius, limits) {
                    Ok(p) => d = p,
                    Err(err) => {
                        log::debug!("[LSR1] Subproblem solve failed: {}", err);
                        termination = force_restart(state, RestartReason::SingularModel, n_iter);
                        break;
                    }
                }
                model
            };

            // Momentum blend, both terms clipped to the region.
            v = &v * cfg.mu + &(&s * (1.0 - cfg.nu));
            v.scaled_add(-cfg.nu * cfg.alpha_s, &g);
            clip_to_radius(&mut v, trust.radius);
            d = &d * (1.0 - cfg.nu) + &(&v * cfg.mu);
            clip_to_radius(&mut d, trust.radius);

            let dg = d.dot(&g).abs();
            let d_norm = norm(&d);
            if d_norm == 0.0 || dg.min(dg / d_norm) < ORTHOGONALITY_TOL * norm(&g) {
                termination = force_restart(state, RestartReason::OrthogonalDirection, n_iter);
                break;
            }

            let dHd = model.quad_form(&d);
            let mut gtd = g.dot(&d);
            if gtd > 0.0 {
                d.mapv_inplace(|x| -x);
                gtd = -gtd;
            }
            let initial_step = if restarting {
                (1.0 / g.iter().map(|x| x.abs()).sum::<f64>()).min(1.0) * cfg.lr
            } else {
                cfg.lr
            };
            let prev_grad = g.clone();
            let prev_loss = loss;

            let t = match cfg.line_search {
                Some(LineSearchKind::StrongWolfe) => {
                    let base = oracle.point();
                    let result = line_search::strong_wolfe(
                        |t| oracle.evaluate_at_offset(&base, t, &d),
                        initial_step,
                        &d,
                        loss,
                        &g,
                        gtd,
                        &cfg.wolfe,
                    );
                    func_evals += result.evals;
                    let grad_finite = result.grad.iter().all(|x| x.is_finite());
                    if !result.loss.is_finite()
                        || result.loss > MAX_LOSS
                        || !grad_finite
                        || !STEP_RANGE.contains(&result.step)
                    {
                        log::debug!(
                            "[LSR1] Line search result rejected: t = {:.3e}, loss = {:.3e}",
                            result.step,
                            result.loss
                        );
                        termination =
                            force_restart(state, RestartReason::LineSearchRejected, n_iter);
                        break;
                    }
                    let converged = inf_norm(&result.grad) <= cfg.tolerance_grad;
                    if !converged && !STEP_RANGE.contains(&norm(&result.grad)) {
                        termination =
                            force_restart(state, RestartReason::LineSearchRejected, n_iter);
                        break;
                    }
                    oracle.add_scaled(result.step, &d);
                    loss = result.loss;
                    g = result.grad;
                    alpha = Some(result.step);
                    if converged {
                        log::info!(
                            "[LSR1] Converged after {} iterations: loss = {:.6e}, ||g||_inf = {:.3e}.",
                            n_iter,
                            loss,
                            inf_norm(&g)
                        );
                        state.restart = true;
                        termination = Termination::Converged;
                        break;
                    }
                    result.step
                }
                None => {
                    let base = oracle.point();
                    oracle.add_scaled(initial_step, &d);
                    alpha = Some(initial_step);
                    // The last iteration is not re-evaluated; loss and gradient
                    // stay those of the previous point.
                    if n_iter < cfg.max_iter {
                        let (f_new, g_new) = oracle.evaluate();
                        func_evals += 1;
                        if !f_new.is_finite() || g_new.iter().any(|x| !x.is_finite()) {
                            oracle.restore(&base);
                            termination =
                                force_restart(state, RestartReason::NonFiniteLoss, n_iter);
                            break;
                        }
                        loss = f_new;
                        g = g_new;
                        if inf_norm(&g) <= cfg.tolerance_grad {
                            log::info!(
                                "[LSR1] Converged after {} iterations: loss = {:.6e}.",
                                n_iter,
                                loss
                            );
                            state.restart = true;
                            termination = Termination::Converged;
                            break;
                        }
                    }
                    initial_step
                }
            };

            s = &d * t;
            y = &g - &prev_grad;
            let cond_rest = dHd * t;
            state.memory.offer(s.clone(), y.clone(), cond_rest);
            if state.memory.is_empty() {
                termination = force_restart(state, RestartReason::EmptyMemory, n_iter);
                break;
            }

            let ared = prev_loss - loss;
            if ared.abs() < cfg.tolerance_change {
                termination = force_restart(state, RestartReason::InsufficientProgress, n_iter);
                break;
            }
            let pred = loss + g.dot(&d) + 0.5 * dHd;
            let r = ared / pred;
            trust.update(r, &s);

            log::debug!(
                "[LSR1] Iteration {}: loss = {:.6e}, t = {:.3e}, ratio = {:.3e}, \
                 radius = {:.3e}, memory = {}",
                n_iter,
                loss,
                t,
                r,
                trust.radius,
                state.memory.len()
            );
        }

        state.trust = Some(trust);
        state.v = Some(v);
        state.s = Some(s);
        state.y = Some(y);
        state.direction = Some(d);
        state.alpha = alpha;
        state.prev_flat_grad = Some(g);

        Ok(StepOutcome {
            initial_loss,
            loss,
            iterations,
            func_evals,
            termination,
            trust_radius: trust.radius,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{Lsr1, RestartReason, Termination};
    use crate::config::Lsr1Config;
    use crate::line_search::WolfeParams;
    use crate::memory::Sr1Memory;
    use crate::oracle::{BlockOracle, ClosureOracle, Oracle};
    use crate::state::Lsr1State;
    use crate::trust_region::TrustSolver;
    use crate::Lsr1Error;
    use ndarray::{Array1, ArrayD, IxDyn, array};
    use spectral::prelude::*;

    // --- Test Harness: Objective Functions ---

    fn sphere(x: &Array1<f64>) -> (f64, Array1<f64>) {
        (x.dot(x), x * 2.0)
    }

    fn elongated_quadratic(x: &Array1<f64>) -> (f64, Array1<f64>) {
        let f = x[0] * x[0] + 10.0 * x[1] * x[1];
        (f, array![2.0 * x[0], 20.0 * x[1]])
    }

    fn rosenbrock(x: &Array1<f64>) -> (f64, Array1<f64>) {
        let a = 1.0;
        let b = 100.0;
        let f = (a - x[0]).powi(2) + b * (x[1] - x[0].powi(2)).powi(2);
        let g = array![
            -2.0 * (a - x[0]) - 4.0 * b * (x[1] - x[0].powi(2)) * x[0],
            2.0 * b * (x[1] - x[0].powi(2))
        ];
        (f, g)
    }

    fn exact_config() -> Lsr1Config {
        Lsr1Config {
            tr_radius: 5.0,
            mu: 0.0,
            nu: 0.0,
            alpha_s: 0.0,
            tolerance_grad: 1e-8,
            ..Lsr1Config::default()
        }
    }

    // On ||x||^2 every step is collinear with x0, so a second curvature pair
    // always leaves M singular. A tight curvature condition lets the line
    // search reach the minimizer on the restart iteration; the wide radius and
    // disabled momentum keep that first direction equal to -x0.
    fn exact_search_config() -> Lsr1Config {
        Lsr1Config {
            wolfe: WolfeParams {
                c2: 0.1,
                ..WolfeParams::default()
            },
            ..exact_config()
        }
    }

    // --- 1. Convergence ---

    #[test]
    fn test_sphere_converges_within_one_call() {
        let mut optimizer = Lsr1::from_config(exact_search_config()).unwrap();
        let mut oracle = ClosureOracle::new(array![3.0, 4.0], sphere);
        let outcome = optimizer.step(&mut oracle).unwrap();

        assert_eq!(outcome.termination, Termination::Converged);
        assert_that!(&outcome.iterations).is_less_than_or_equal_to(20);
        assert_that!(&outcome.initial_loss).is_close_to(25.0, 1e-12);
        assert_that!(&oracle.x().dot(oracle.x()).sqrt()).is_less_than(1e-6);
        assert!(optimizer.state().restart);
    }

    #[test]
    fn test_converged_point_is_left_untouched() {
        let mut optimizer = Lsr1::from_config(exact_search_config()).unwrap();
        let mut oracle = ClosureOracle::new(array![3.0, 4.0], sphere);
        assert!(optimizer.step(&mut oracle).unwrap().converged());

        let point = oracle.point();
        let state = optimizer.state().clone();
        let outcome = optimizer.step(&mut oracle).unwrap();
        assert_eq!(outcome.termination, Termination::Converged);
        assert_eq!(outcome.iterations, 0);
        assert_eq!(outcome.func_evals, 1);
        assert_eq!(oracle.point(), point);
        assert_eq!(optimizer.state(), &state);
    }

    #[test]
    fn test_begin_at_minimum_terminates_immediately() {
        let mut optimizer = Lsr1::new();
        let mut oracle = ClosureOracle::new(array![0.0, 0.0], sphere);
        let outcome = optimizer.step(&mut oracle).unwrap();
        assert!(outcome.converged());
        assert_eq!(outcome.iterations, 0);
        assert!(optimizer.state().trust.is_none());
    }

    #[test]
    fn test_loss_never_increases_with_line_search() {
        let mut optimizer = Lsr1::new();
        let mut oracle = ClosureOracle::new(array![1.0, 1.0], elongated_quadratic);
        let start = 11.0;
        let mut last = start;
        for _ in 0..5 {
            let outcome = optimizer.step(&mut oracle).unwrap();
            assert_that!(&outcome.loss).is_less_than_or_equal_to(outcome.initial_loss);
            assert_that!(&outcome.initial_loss).is_close_to(last, 1e-12);
            last = elongated_quadratic(oracle.x()).0;
        }
        assert_that!(&last).is_less_than(start);
    }

    #[test]
    fn test_rosenbrock_makes_progress_with_every_solver() {
        for solver in [TrustSolver::Obs, TrustSolver::CauchyPoint, TrustSolver::SteihaugCg] {
            let mut optimizer = Lsr1::new()
                .with_trust_solver(solver)
                .with_tr_radius(0.5)
                .with_momentum(0.0, 0.0, 0.0);
            let mut oracle = ClosureOracle::new(array![-1.2, 1.0], rosenbrock);
            let start = rosenbrock(oracle.x()).0;
            for _ in 0..3 {
                optimizer.step(&mut oracle).unwrap();
            }
            let end = rosenbrock(oracle.x()).0;
            assert!(end < start, "{solver:?}: {end} >= {start}");
        }
    }

    // --- 2. Restarts ---

    #[test]
    fn test_singular_model_forces_restart() {
        let mut memory = Sr1Memory::new(3);
        for _ in 0..2 {
            assert!(memory.offer(array![1.0, 0.0], array![2.0, 0.0], 0.0));
        }
        let mut state = Lsr1State::new(3);
        state.restart = false;
        state.memory = memory;

        let mut optimizer = Lsr1::new();
        optimizer.load_state(state);
        let mut oracle = ClosureOracle::new(array![3.0, 4.0], sphere);
        let outcome = optimizer.step(&mut oracle).unwrap();
        assert_eq!(
            outcome.termination,
            Termination::Restarted(RestartReason::SingularModel)
        );
        assert_eq!(outcome.iterations, 1);
        assert!(optimizer.state().restart);
        assert_eq!(oracle.x(), &array![3.0, 4.0]);

        // The next call discards the history and steps along -g.
        let mut optimizer = optimizer.with_max_iter(1);
        let outcome = optimizer.step(&mut oracle).unwrap();
        assert_eq!(outcome.termination, Termination::MaxIterations);
        assert_eq!(optimizer.state().memory.len(), 1);
        let d = optimizer.state().direction.clone().unwrap();
        assert_that!(&d[0]).is_less_than(0.0);
        assert_that!(&(d[0] * 8.0 - d[1] * 6.0)).is_close_to(0.0, 1e-15);
        assert_that!(&outcome.loss).is_less_than(25.0);
    }

    #[test]
    fn test_orthogonal_direction_forces_restart() {
        // B = 2 along e0 matches the sphere; the stored step points along e1.
        let mut state = Lsr1State::new(3);
        state.restart = false;
        state.memory.offer(array![1.0, 0.0], array![2.0, 0.0], 0.0);
        state.s = Some(array![0.0, 50.0]);
        let mut optimizer = Lsr1::new()
            .with_tr_radius(10.0)
            .with_momentum(0.5, 0.9999999, 0.0);
        optimizer.load_state(state);

        // With nu close to one the solver step is scaled away and the
        // momentum term along e1 dominates the direction.
        let mut oracle = ClosureOracle::new(array![1e-3, 0.0], sphere);
        let outcome = optimizer.step(&mut oracle).unwrap();
        assert_eq!(
            outcome.termination,
            Termination::Restarted(RestartReason::OrthogonalDirection)
        );
        assert!(optimizer.state().restart);
        assert_eq!(oracle.x(), &array![1e-3, 0.0]);
    }

    #[test]
    fn test_unbounded_line_search_is_rejected() {
        // f = -x never satisfies the curvature condition; the search runs
        // past the largest admissible step.
        let mut optimizer = Lsr1::from_config(exact_config()).unwrap();
        let mut oracle = ClosureOracle::new(array![0.0], |x: &Array1<f64>| (-x[0], array![-1.0]));
        let outcome = optimizer.step(&mut oracle).unwrap();
        assert_eq!(
            outcome.termination,
            Termination::Restarted(RestartReason::LineSearchRejected)
        );
        assert_eq!(outcome.iterations, 1);
        assert!(optimizer.state().restart);
        assert_eq!(oracle.x(), &array![0.0]);
        assert_that!(&outcome.loss).is_close_to(0.0, 1e-15);
    }

    #[test]
    fn test_non_finite_fixed_step_restores_parameters() {
        let guarded = |x: &Array1<f64>| {
            if x[0] >= 2.5 {
                sphere(x)
            } else {
                (f64::NAN, array![f64::NAN])
            }
        };
        let mut optimizer = Lsr1::from_config(exact_config())
            .unwrap()
            .with_line_search(None)
            .with_max_iter(2);
        let mut oracle = ClosureOracle::new(array![3.0], guarded);
        // The restart step lands on 3 - 5/6.
        let outcome = optimizer.step(&mut oracle).unwrap();
        assert_eq!(
            outcome.termination,
            Termination::Restarted(RestartReason::NonFiniteLoss)
        );
        assert_eq!(outcome.func_evals, 2);
        assert!(optimizer.state().restart);
        assert_eq!(oracle.x(), &array![3.0]);
        assert_that!(&outcome.loss).is_close_to(9.0, 1e-15);
    }

    #[test]
    fn test_rejected_pair_on_restart_leaves_memory_empty() {
        // On -x^2 the step s = 1 gives y.s = -2, below the model correction of 1.
        let mut optimizer = Lsr1::from_config(exact_config())
            .unwrap()
            .with_line_search(None)
            .with_max_iter(2);
        let mut oracle = ClosureOracle::new(array![0.5], |x: &Array1<f64>| (-x.dot(x), x * -2.0));
        let outcome = optimizer.step(&mut oracle).unwrap();
        assert_eq!(
            outcome.termination,
            Termination::Restarted(RestartReason::EmptyMemory)
        );
        assert!(optimizer.state().restart);
        assert!(optimizer.state().memory.is_empty());
        // The step itself is kept.
        assert_that!(&oracle.x()[0]).is_close_to(1.5, 1e-15);
        assert_that!(&outcome.loss).is_close_to(-2.25, 1e-15);
    }

    #[test]
    fn test_small_loss_change_forces_restart() {
        let config = Lsr1Config {
            tolerance_change: 1e3,
            ..exact_config()
        };
        let mut optimizer = Lsr1::from_config(config).unwrap();
        let mut oracle = ClosureOracle::new(array![3.0, 4.0], sphere);
        let outcome = optimizer.step(&mut oracle).unwrap();
        assert_eq!(
            outcome.termination,
            Termination::Restarted(RestartReason::InsufficientProgress)
        );
        assert_eq!(outcome.iterations, 1);
        assert!(optimizer.state().restart);
        assert_eq!(optimizer.state().memory.len(), 1);
        // The line search step to (2/7) x0 is kept.
        assert_that!(&outcome.loss).is_close_to(100.0 / 49.0, 1e-10);
        assert_that!(&oracle.x()[0]).is_close_to(6.0 / 7.0, 1e-12);
        assert_that!(&oracle.x()[1]).is_close_to(8.0 / 7.0, 1e-12);
    }

    // --- 3. Fixed steps ---

    #[test]
    fn test_fixed_step_final_iteration_is_not_reevaluated() {
        let mut optimizer = Lsr1::from_config(exact_config())
            .unwrap()
            .with_line_search(None)
            .with_max_iter(1);
        let mut oracle = ClosureOracle::new(array![3.0, 4.0], sphere);
        let outcome = optimizer.step(&mut oracle).unwrap();
        // The loss is unchanged, so the ratio step sees no progress.
        assert_eq!(
            outcome.termination,
            Termination::Restarted(RestartReason::InsufficientProgress)
        );
        assert_eq!(outcome.func_evals, 1);
        assert_that!(&outcome.loss).is_close_to(25.0, 1e-15);
        assert!(optimizer.state().restart);
        assert_eq!(optimizer.state().memory.len(), 1);
        assert_eq!(optimizer.state().y, Some(array![0.0, 0.0]));
        assert_that!(&outcome.trust_radius).is_close_to(5.0, 1e-15);
        // Restart step: -g clipped to the radius, scaled by 1/||g||_1.
        assert_that!(&oracle.x()[0]).is_close_to(3.0 * 13.0 / 14.0, 1e-12);
        assert_that!(&oracle.x()[1]).is_close_to(4.0 * 13.0 / 14.0, 1e-12);
    }

    #[test]
    fn test_fixed_steps_update_memory_and_radius() {
        let mut optimizer = Lsr1::from_config(exact_config())
            .unwrap()
            .with_line_search(None)
            .with_max_iter(2);
        let mut oracle = ClosureOracle::new(array![3.0, 4.0], sphere);
        let outcome = optimizer.step(&mut oracle).unwrap();
        assert_eq!(
            outcome.termination,
            Termination::Restarted(RestartReason::InsufficientProgress)
        );
        assert_eq!(outcome.func_evals, 2);
        assert_eq!(optimizer.state().memory.len(), 2);
        assert_that!(&outcome.loss).is_close_to(25.0 * 169.0 / 196.0, 1e-10);
        assert_that!(&outcome.trust_radius).is_close_to(5.0 / 14.0, 1e-12);
        // Second step: OBS boundary step of length 5/14 towards the origin.
        let radius = oracle.x().dot(oracle.x()).sqrt();
        assert_that!(&radius).is_close_to(60.0 / 14.0, 1e-9);
    }

    // --- 4. Errors ---

    #[test]
    fn test_multiple_parameter_groups_rejected() {
        let blocks = vec![ArrayD::from_shape_vec(IxDyn(&[2]), vec![1.0, 2.0]).unwrap()];
        let mut oracle = BlockOracle::new(blocks, |b: &[ArrayD<f64>]| {
            (b[0].sum(), vec![Some(b[0].mapv(|_| 1.0))])
        })
        .with_groups(2);
        let err = Lsr1::new().step(&mut oracle).unwrap_err();
        assert!(matches!(err, Lsr1Error::MultipleParameterGroups(2)));
    }

    #[test]
    fn test_nan_entry_evaluation_is_an_error() {
        let mut oracle = ClosureOracle::new(array![1.0], |x: &Array1<f64>| (f64::NAN, x.clone()));
        let err = Lsr1::new().step(&mut oracle).unwrap_err();
        assert!(matches!(err, Lsr1Error::NonFiniteEvaluation));
    }

    #[test]
    fn test_invalid_config_rejected_at_step() {
        let mut oracle = ClosureOracle::new(array![1.0], sphere);
        let err = Lsr1::new().with_momentum(1.0, 0.5, 0.0).step(&mut oracle).unwrap_err();
        assert!(matches!(err, Lsr1Error::InvalidHyperparameter { name: "mu", .. }));
    }

    #[test]
    fn test_state_of_wrong_dimension_rejected() {
        let mut state = Lsr1State::new(3);
        state.restart = false;
        state.v = Some(array![0.0, 0.0, 0.0]);
        let mut optimizer = Lsr1::new();
        optimizer.load_state(state);
        let mut oracle = ClosureOracle::new(array![1.0, 1.0], sphere);
        let err = optimizer.step(&mut oracle).unwrap_err();
        assert!(matches!(
            err,
            Lsr1Error::DimensionMismatch {
                expected: 2,
                found: 3
            }
        ));
    }

    // --- 5. State ---

    #[test]
    fn test_resume_from_serialized_state() {
        let config = Lsr1Config {
            max_iter: 1,
            ..exact_config()
        };
        let mut first = Lsr1::from_config(config.clone()).unwrap();
        let mut oracle = ClosureOracle::new(array![3.0, 4.0], sphere);
        let outcome = first.step(&mut oracle).unwrap();
        assert_eq!(outcome.termination, Termination::MaxIterations);

        let json = serde_json::to_string(first.state()).unwrap();
        let restored: Lsr1State = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.memory.len(), 1);

        let mut second = Lsr1::from_config(config).unwrap();
        second.load_state(restored);
        let mut copy = ClosureOracle::new(oracle.x().clone(), sphere);
        let expected = first.step(&mut oracle).unwrap();
        let resumed = second.step(&mut copy).unwrap();
        assert_eq!(resumed.termination, expected.termination);
        assert_that!(&resumed.loss).is_less_than(resumed.initial_loss);
        assert_that!(&resumed.loss).is_close_to(expected.loss, 1e-12);
        for i in 0..2 {
            assert_that!(&copy.x()[i]).is_close_to(oracle.x()[i], 1e-12);
        }
    }

    #[test]
    fn test_pending_restart_accepts_new_dimension() {
        let mut optimizer = Lsr1::from_config(exact_search_config()).unwrap();
        let mut plane = ClosureOracle::new(array![3.0, 4.0], sphere);
        assert!(optimizer.step(&mut plane).unwrap().converged());

        let mut space = ClosureOracle::new(array![1.0, 2.0, 2.0], sphere);
        let outcome = optimizer.step(&mut space).unwrap();
        assert_eq!(outcome.termination, Termination::Converged);
        assert_that!(&space.x().dot(space.x()).sqrt()).is_less_than(1e-6);
        let state = optimizer.state();
        assert_eq!(state.v.as_ref().map(|v| v.len()), Some(3));
        assert_eq!(state.direction.as_ref().map(|d| d.len()), Some(3));
    }

    #[test]
    fn test_reset_clears_history() {
        let mut optimizer = Lsr1::from_config(Lsr1Config {
            max_iter: 1,
            ..exact_config()
        })
        .unwrap();
        let mut oracle = ClosureOracle::new(array![3.0, 4.0], sphere);
        optimizer.step(&mut oracle).unwrap();
        assert!(!optimizer.state().memory.is_empty());
        optimizer.reset();
        assert!(optimizer.state().memory.is_empty());
        assert!(optimizer.state().restart);
        assert!(optimizer.state().trust.is_none());
    }
}

//! Strong Wolfe line search with cubic interpolation.
//!
//! The search first extrapolates until it brackets an interval containing an
//! acceptable step, then zooms into that interval. A non-finite loss at a
//! trial step always counts as a failed sufficient-decrease test, so the
//! search backs off non-finite regions instead of stepping into them.

use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// Constants of the strong Wolfe conditions and the search budget.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WolfeParams {
    /// Sufficient-decrease constant.
    pub c1: f64,
    /// Curvature constant.
    pub c2: f64,
    /// The zoom stops once the bracket, scaled by `max|d|`, is narrower than this.
    pub tolerance_change: f64,
    /// Maximum number of additional evaluations.
    pub max_ls: usize,
}

impl Default for WolfeParams {
    fn default() -> Self {
        Self {
            c1: 1e-4,
            c2: 0.9,
            tolerance_change: 1e-9,
            max_ls: 25,
        }
    }
}

/// Accepted step and the oracle values at it.
#[derive(Debug, Clone)]
pub struct LineSearchResult {
    pub step: f64,
    pub loss: f64,
    pub grad: Array1<f64>,
    /// Number of oracle evaluations spent by the search.
    pub evals: usize,
}

/// Minimizer of the cubic through `(x1, f1, g1)` and `(x2, f2, g2)`, clamped
/// to `bounds` (the interval between the two points by default). Falls back
/// to the midpoint of the bounds when the cubic has no real minimizer.
pub(crate) fn cubic_interpolate(
    x1: f64,
    f1: f64,
    g1: f64,
    x2: f64,
    f2: f64,
    g2: f64,
    bounds: Option<(f64, f64)>,
) -> f64 {
    let (lo, hi) = bounds.unwrap_or(if x1 <= x2 { (x1, x2) } else { (x2, x1) });
    let d1 = g1 + g2 - 3.0 * (f1 - f2) / (x1 - x2);
    let d2_sq = d1 * d1 - g1 * g2;
    if d2_sq >= 0.0 {
        let d2 = d2_sq.sqrt();
        let min_pos = if x1 <= x2 {
            x2 - (x2 - x1) * ((g2 + d2 - d1) / (g2 - g1 + 2.0 * d2))
        } else {
            x1 - (x1 - x2) * ((g1 + d2 - d1) / (g1 - g2 + 2.0 * d2))
        };
        if !min_pos.is_nan() {
            return min_pos.max(lo).min(hi);
        }
    }
    0.5 * (lo + hi)
}

/// One evaluated point along the search line.
#[derive(Debug, Clone)]
struct Trial {
    t: f64,
    f: f64,
    g: Array1<f64>,
    gtd: f64,
}

impl Trial {
    fn into_result(self, evals: usize) -> LineSearchResult {
        LineSearchResult {
            step: self.t,
            loss: self.f,
            grad: self.g,
            evals,
        }
    }
}

/// Index of the lower and the higher end of a bracket. A NaN loss is never
/// the lower end.
fn low_high(bracket: &[Trial; 2]) -> (usize, usize) {
    if bracket[1].f < bracket[0].f || (bracket[0].f.is_nan() && !bracket[1].f.is_nan()) {
        (1, 0)
    } else {
        (0, 1)
    }
}

/// Runs the strong Wolfe search along `d` starting at step `t`.
///
/// `eval(t)` must return the loss and gradient at `x + t d`; the caller owns
/// the base point. `f0`, `g0` and `gtd0 = g0.d` describe `t = 0`.
pub fn strong_wolfe<F>(
    mut eval: F,
    t: f64,
    d: &Array1<f64>,
    f0: f64,
    g0: &Array1<f64>,
    gtd0: f64,
    params: &WolfeParams,
) -> LineSearchResult
where
    F: FnMut(f64) -> (f64, Array1<f64>),
{
    let WolfeParams {
        c1,
        c2,
        tolerance_change,
        max_ls,
    } = *params;
    let d_norm = d.fold(0.0_f64, |acc, v| acc.max(v.abs()));
    let armijo_fails = |t: f64, f: f64| !(f <= f0 + c1 * t * gtd0);
    let curvature_holds = |gtd: f64| gtd.abs() <= -c2 * gtd0;

    let mut sample = |t: f64| {
        let (f, g) = eval(t);
        let gtd = g.dot(d);
        Trial { t, f, g, gtd }
    };

    let origin = Trial {
        t: 0.0,
        f: f0,
        g: g0.clone(),
        gtd: gtd0,
    };
    let mut cur = sample(t);
    let mut evals = 1;
    let mut ls_iter = 0;
    let mut prev = origin.clone();

    // Bracketing phase.
    let mut bracket = loop {
        if ls_iter >= max_ls {
            break [origin, cur];
        }
        if armijo_fails(cur.t, cur.f) || (ls_iter > 1 && cur.f >= prev.f) {
            break [prev, cur];
        }
        if curvature_holds(cur.gtd) {
            return cur.into_result(evals);
        }
        if cur.gtd >= 0.0 {
            break [prev, cur];
        }
        let min_step = cur.t + 0.01 * (cur.t - prev.t);
        let max_step = cur.t * 10.0;
        let next_t = cubic_interpolate(
            prev.t,
            prev.f,
            prev.gtd,
            cur.t,
            cur.f,
            cur.gtd,
            Some((min_step, max_step)),
        );
        let next = sample(next_t);
        evals += 1;
        ls_iter += 1;
        prev = std::mem::replace(&mut cur, next);
    };

    // Zoom phase.
    let mut insuf_progress = false;
    let (mut low, mut high) = low_high(&bracket);
    while ls_iter < max_ls {
        if (bracket[1].t - bracket[0].t).abs() * d_norm < tolerance_change {
            break;
        }
        let mut t = cubic_interpolate(
            bracket[0].t,
            bracket[0].f,
            bracket[0].gtd,
            bracket[1].t,
            bracket[1].f,
            bracket[1].gtd,
            None,
        );

        // Keep trials at least 10% of the width away from the edges once an
        // interpolant has hugged an edge twice in a row or left the bracket.
        let t_max = bracket[0].t.max(bracket[1].t);
        let t_min = bracket[0].t.min(bracket[1].t);
        let eps = 0.1 * (t_max - t_min);
        if (t_max - t).min(t - t_min) < eps {
            if insuf_progress || t >= t_max || t <= t_min {
                t = if (t - t_max).abs() < (t - t_min).abs() {
                    t_max - eps
                } else {
                    t_min + eps
                };
                insuf_progress = false;
            } else {
                insuf_progress = true;
            }
        } else {
            insuf_progress = false;
        }

        let trial = sample(t);
        evals += 1;
        ls_iter += 1;

        if armijo_fails(trial.t, trial.f) || trial.f >= bracket[low].f {
            bracket[high] = trial;
            (low, high) = low_high(&bracket);
        } else {
            let done = curvature_holds(trial.gtd);
            if !done && trial.gtd * (bracket[high].t - bracket[low].t) >= 0.0 {
                bracket[high] = bracket[low].clone();
            }
            bracket[low] = trial;
            if done {
                break;
            }
        }
    }

    log::debug!(
        "[LSR1 Wolfe] bracket [{:.3e}, {:.3e}] after {} evaluations",
        bracket[0].t,
        bracket[1].t,
        evals
    );
    let [first, second] = bracket;
    let best = if low == 0 { first } else { second };
    best.into_result(evals)
}

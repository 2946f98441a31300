//! Trust-region radius control from smoothed reduction ratios.

use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// Radius and the running average of the reduction ratio that drives it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrustRegionState {
    pub radius: f64,
    /// Effective averaging weight, grows as `T <- T/2 + 1`.
    #[serde(rename = "T")]
    pub t: f64,
    /// Smoothed (negated) reduction ratio.
    pub rho: f64,
}

impl TrustRegionState {
    pub fn new(radius: f64) -> Self {
        Self {
            radius,
            t: 0.0,
            rho: 0.0,
        }
    }

    /// Folds the ratio `r = ared / pred` of the step `s` into the average and
    /// adjusts the radius: shrink to `min(radius, ||s||)` when the average is
    /// below 0.5, double when it is not and the step reached the boundary.
    pub fn update(&mut self, r: f64, s: &Array1<f64>) {
        let half = 0.5 * self.t;
        self.rho = (half * self.rho - r) / (half + 1.0);
        self.t = half + 1.0;
        let s_norm = s.dot(s).sqrt();
        let before = self.radius;
        if self.rho < 0.5 {
            self.radius = self.radius.min(s_norm);
        }
        if self.rho >= 0.5 && s_norm >= self.radius {
            self.radius *= 2.0;
        }
        if self.radius != before {
            log::info!(
                "[LSR1] trust radius {:.3e} -> {:.3e} (rho = {:.3}, ||s|| = {:.3e})",
                before,
                self.radius,
                self.rho,
                s_norm
            );
        }
    }

    /// Forgets the ratio history; the radius is kept.
    pub fn reset_smoothing(&mut self) {
        self.t = 0.0;
        self.rho = 0.0;
    }
}

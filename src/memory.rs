//! Bounded FIFO history of curvature pairs.

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Smallest admissible value of `y.s + cond_rest` for a pair to be stored.
pub const CURVATURE_THRESHOLD: f64 = 1e-10;

/// A step `s` and the gradient change `y` it produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurvaturePair {
    pub s: Array1<f64>,
    pub y: Array1<f64>,
}

/// Ring buffer of accepted curvature pairs, oldest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sr1Memory {
    pairs: VecDeque<CurvaturePair>,
    cap: usize,
}

impl Sr1Memory {
    pub fn new(cap: usize) -> Self {
        Self {
            pairs: VecDeque::with_capacity(cap.max(1)),
            cap: cap.max(1),
        }
    }

    /// Offers a pair to the history. Returns `true` if it was stored.
    ///
    /// The pair is rejected without side effects unless
    /// `y.s + cond_rest > 1e-10`. When the buffer is full the oldest pair is
    /// evicted first.
    pub fn offer(&mut self, s: Array1<f64>, y: Array1<f64>, cond_rest: f64) -> bool {
        let ys = y.dot(&s);
        if !(ys + cond_rest > CURVATURE_THRESHOLD) {
            log::debug!(
                "[LSR1] curvature pair rejected: y.s={:.3e}, cond_rest={:.3e}",
                ys,
                cond_rest
            );
            return false;
        }
        if self.pairs.len() == self.cap {
            self.pairs.pop_front();
        }
        self.pairs.push_back(CurvaturePair { s, y });
        true
    }

    pub fn clear(&mut self) {
        self.pairs.clear();
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    /// Shrinks or grows the capacity, dropping the oldest pairs if needed.
    pub fn set_capacity(&mut self, cap: usize) {
        self.cap = cap.max(1);
        while self.pairs.len() > self.cap {
            self.pairs.pop_front();
        }
    }

    /// The most recently accepted pair.
    pub fn latest(&self) -> Option<&CurvaturePair> {
        self.pairs.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CurvaturePair> {
        self.pairs.iter()
    }

    /// Dimension of the stored vectors, if any pair is stored.
    pub fn dim(&self) -> Option<usize> {
        self.pairs.front().map(|p| p.s.len())
    }

    /// Stacks the history as `n x k` matrices `(S, Y)`, one column per pair in
    /// insertion order. Returns `None` for an empty history.
    pub fn matrices(&self) -> Option<(Array2<f64>, Array2<f64>)> {
        let n = self.dim()?;
        let k = self.pairs.len();
        let S = Array2::from_shape_fn((n, k), |(i, j)| self.pairs[j].s[i]);
        let Y = Array2::from_shape_fn((n, k), |(i, j)| self.pairs[j].y[i]);
        Some((S, Y))
    }
}

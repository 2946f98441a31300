//! State carried between `step()` calls.

use crate::memory::Sr1Memory;
use crate::radius::TrustRegionState;
use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// Everything [`Lsr1`](crate::Lsr1) remembers between calls.
///
/// Serializable so that a run can be checkpointed and resumed. Vectors are
/// `None` until the first iteration that produces them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lsr1State {
    /// The next iteration discards the history and takes a gradient step.
    pub restart: bool,
    pub memory: Sr1Memory,
    /// Radius and ratio smoothing; `None` before the first call.
    pub trust: Option<TrustRegionState>,
    /// Momentum buffer.
    pub v: Option<Array1<f64>>,
    /// Last applied step `t d`.
    pub s: Option<Array1<f64>>,
    /// Last gradient difference.
    pub y: Option<Array1<f64>>,
    /// Last search direction.
    pub direction: Option<Array1<f64>>,
    /// Last step length along `direction`.
    pub alpha: Option<f64>,
    pub prev_flat_grad: Option<Array1<f64>>,
}

impl Lsr1State {
    pub fn new(memory_size: usize) -> Self {
        Self {
            restart: true,
            memory: Sr1Memory::new(memory_size),
            trust: None,
            v: None,
            s: None,
            y: None,
            direction: None,
            alpha: None,
            prev_flat_grad: None,
        }
    }

    /// Length of the first stored vector that disagrees with `n`, if any.
    pub(crate) fn mismatched_dim(&self, n: usize) -> Option<usize> {
        let vectors = [&self.v, &self.s, &self.y, &self.direction, &self.prev_flat_grad];
        vectors
            .into_iter()
            .flatten()
            .map(|v| v.len())
            .chain(self.memory.dim())
            .find(|&len| len != n)
    }
}

#[cfg(test)]
mod tests {
    use super::Lsr1State;
    use crate::radius::TrustRegionState;
    use ndarray::array;

    #[test]
    fn test_fresh_state_starts_with_restart() {
        let state = Lsr1State::new(4);
        assert!(state.restart);
        assert!(state.memory.is_empty());
        assert_eq!(state.memory.capacity(), 4);
        assert!(state.trust.is_none());
        assert_eq!(state.mismatched_dim(7), None);
    }

    #[test]
    fn test_mismatched_dim_checks_vectors_and_memory() {
        let mut state = Lsr1State::new(2);
        state.v = Some(array![0.0, 0.0]);
        assert_eq!(state.mismatched_dim(2), None);
        assert_eq!(state.mismatched_dim(3), Some(2));

        state.memory.offer(array![1.0, 0.0, 0.0], array![1.0, 0.0, 0.0], 0.0);
        assert_eq!(state.mismatched_dim(2), Some(3));
    }

    #[test]
    fn test_state_json_round_trip() {
        let mut state = Lsr1State::new(3);
        state.restart = false;
        state.memory.offer(array![1.0, 2.0], array![0.5, 1.0], 0.0);
        state.trust = Some(TrustRegionState {
            radius: 0.25,
            t: 1.5,
            rho: -0.75,
        });
        state.v = Some(array![0.1, -0.2]);
        state.direction = Some(array![-1.0, 0.0]);
        state.alpha = Some(0.5);

        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains("\"T\":1.5"));
        let back: Lsr1State = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}

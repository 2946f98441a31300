//! The host side of the optimizer: owns the parameters and evaluates the
//! objective.

use ndarray::{Array1, ArrayD, s};

/// Parameter container and loss/gradient oracle driven by [`Lsr1`](crate::Lsr1).
///
/// All vectors are flat views of the parameters in a fixed order.
pub trait Oracle {
    /// Snapshot of the current parameters.
    fn point(&self) -> Array1<f64>;

    /// `x <- x + step * direction`.
    fn add_scaled(&mut self, step: f64, direction: &Array1<f64>);

    /// Overwrites the parameters with `point`.
    fn restore(&mut self, point: &Array1<f64>);

    /// Loss and gradient at the current parameters.
    fn evaluate(&mut self) -> (f64, Array1<f64>);

    /// Loss and gradient at `base + step * direction`. The parameters are set
    /// back to `base` afterwards, whatever the evaluation returned.
    fn evaluate_at_offset(
        &mut self,
        base: &Array1<f64>,
        step: f64,
        direction: &Array1<f64>,
    ) -> (f64, Array1<f64>) {
        self.add_scaled(step, direction);
        let out = self.evaluate();
        self.restore(base);
        out
    }

    /// Number of independently configured parameter groups. The optimizer
    /// only supports one.
    fn parameter_groups(&self) -> usize {
        1
    }
}

/// A single flat parameter vector with a closure objective.
pub struct ClosureOracle<F> {
    x: Array1<f64>,
    objective: F,
    evals: usize,
}

impl<F> ClosureOracle<F>
where
    F: FnMut(&Array1<f64>) -> (f64, Array1<f64>),
{
    pub fn new(x0: Array1<f64>, objective: F) -> Self {
        Self {
            x: x0,
            objective,
            evals: 0,
        }
    }

    pub fn x(&self) -> &Array1<f64> {
        &self.x
    }

    /// Number of objective evaluations so far.
    pub fn evals(&self) -> usize {
        self.evals
    }

    pub fn into_point(self) -> Array1<f64> {
        self.x
    }
}

impl<F> Oracle for ClosureOracle<F>
where
    F: FnMut(&Array1<f64>) -> (f64, Array1<f64>),
{
    fn point(&self) -> Array1<f64> {
        self.x.clone()
    }

    fn add_scaled(&mut self, step: f64, direction: &Array1<f64>) {
        self.x.scaled_add(step, direction);
    }

    fn restore(&mut self, point: &Array1<f64>) {
        self.x.assign(point);
    }

    fn evaluate(&mut self) -> (f64, Array1<f64>) {
        self.evals += 1;
        (self.objective)(&self.x)
    }
}

/// Several n-dimensional parameter blocks flattened in order.
///
/// The closure returns one optional gradient per block; a missing block
/// gradient counts as zeros.
pub struct BlockOracle<F> {
    blocks: Vec<ArrayD<f64>>,
    objective: F,
    groups: usize,
}

impl<F> BlockOracle<F>
where
    F: FnMut(&[ArrayD<f64>]) -> (f64, Vec<Option<ArrayD<f64>>>),
{
    pub fn new(blocks: Vec<ArrayD<f64>>, objective: F) -> Self {
        Self {
            blocks,
            objective,
            groups: 1,
        }
    }

    /// Declares how many parameter groups the host manages.
    pub fn with_groups(mut self, groups: usize) -> Self {
        self.groups = groups;
        self
    }

    pub fn blocks(&self) -> &[ArrayD<f64>] {
        &self.blocks
    }

    pub fn into_blocks(self) -> Vec<ArrayD<f64>> {
        self.blocks
    }

    fn numel(&self) -> usize {
        self.blocks.iter().map(|b| b.len()).sum()
    }

    /// Applies `f(param, flat_value)` to every parameter in flat order.
    fn zip_flat(&mut self, flat: &Array1<f64>, mut f: impl FnMut(&mut f64, f64)) {
        let mut offset = 0;
        for block in &mut self.blocks {
            let len = block.len();
            let chunk = flat.slice(s![offset..offset + len]);
            for (param, &value) in block.iter_mut().zip(chunk.iter()) {
                f(param, value);
            }
            offset += len;
        }
    }
}

impl<F> Oracle for BlockOracle<F>
where
    F: FnMut(&[ArrayD<f64>]) -> (f64, Vec<Option<ArrayD<f64>>>),
{
    fn point(&self) -> Array1<f64> {
        let mut flat = Vec::with_capacity(self.numel());
        for block in &self.blocks {
            flat.extend(block.iter().copied());
        }
        Array1::from_vec(flat)
    }

    fn add_scaled(&mut self, step: f64, direction: &Array1<f64>) {
        self.zip_flat(direction, |param, d| *param += step * d);
    }

    fn restore(&mut self, point: &Array1<f64>) {
        self.zip_flat(point, |param, value| *param = value);
    }

    fn evaluate(&mut self) -> (f64, Array1<f64>) {
        let (loss, grads) = (self.objective)(&self.blocks);
        let mut flat = Vec::with_capacity(self.numel());
        for (i, block) in self.blocks.iter().enumerate() {
            match grads.get(i).and_then(Option::as_ref) {
                Some(grad) => flat.extend(grad.iter().copied()),
                None => flat.extend(std::iter::repeat_n(0.0, block.len())),
            }
        }
        (loss, Array1::from_vec(flat))
    }

    fn parameter_groups(&self) -> usize {
        self.groups
    }
}

use crate::{optimization::Optimizer, swa::WeightAverager};

/// Everything a training run mutates, reused across iterations.
///
/// Owned by the training loop and advanced once per accumulation group.
#[derive(Debug)]
pub struct TrainingState<O> {
    /// The last completed iteration.
    pub iteration: u64,

    /// Live model parameters (flat).
    pub params: Vec<f32>,

    /// Gradient buffer (flat), accumulated across an accumulation group.
    pub grads: Vec<f32>,

    pub optimizer: O,
    pub averager: WeightAverager,

    /// Amount of per-iteration random streams handed out so far.
    pub seeds_consumed: u64,
}

impl<O: Optimizer> TrainingState<O> {
    pub fn new(params: Vec<f32>, optimizer: O, averager: WeightAverager) -> Self {
        Self {
            iteration: 0,
            grads: vec![0.0; params.len()],
            params,
            optimizer,
            averager,
            seeds_consumed: 0,
        }
    }

    #[inline]
    pub fn zero_grads(&mut self) {
        self.grads.fill(0.0);
    }

    /// Returns the parameters to evaluate and checkpoint as averaged ones.
    #[inline]
    pub fn eval_params(&self) -> &[f32] {
        self.averager.view(&self.params)
    }
}

use std::collections::BTreeMap;

use comms::LossMap;
use rand::rngs::StdRng;

use crate::{data::Batch, error::ComputeErr};

/// Named metrics of a single sample.
pub type SampleMetrics = BTreeMap<String, f32>;

/// The model side of a training run: forward, loss, backward and metrics.
///
/// The training loop owns parameters and gradients as flat buffers and lends
/// them to the step, which never keeps them.
pub trait ComputeStep {
    /// Whatever the forward pass produces for a batch.
    type Outputs;

    /// Runs the forward pass.
    ///
    /// # Arguments
    /// * `params` - The parameters to evaluate.
    /// * `batch` - The batch of samples.
    /// * `rng` - The random stream of this iteration, for dropout and the like.
    fn forward(
        &mut self,
        params: &[f32],
        batch: &Batch,
        rng: &mut StdRng,
    ) -> Result<Self::Outputs, ComputeErr>;

    /// Computes the scalar loss to optimize and its named components.
    fn loss(&self, outputs: &Self::Outputs, batch: &Batch) -> (f32, LossMap);

    /// Adds the gradient of the loss times `scale` into `grads`.
    fn backward(
        &mut self,
        params: &[f32],
        outputs: &Self::Outputs,
        batch: &Batch,
        scale: f32,
        grads: &mut [f32],
    ) -> Result<(), ComputeErr>;

    /// Computes the metrics of every sample of the batch, in batch order.
    fn metrics(&self, outputs: &Self::Outputs, batch: &Batch) -> Vec<SampleMetrics>;

    /// Switches between training and evaluation behavior.
    fn set_training(&mut self, training: bool);

    /// Frees transient buffers, called after every validation cycle.
    fn release_caches(&mut self) {}
}

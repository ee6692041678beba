mod layout;
mod ops;

use comms::LossMap;
use rand::{Rng, rngs::StdRng};

pub use layout::ParameterLayout;
pub use ops::{LinearView, linreg_mse_grad_accumulate, mse};

use crate::{
    compute::{ComputeStep, SampleMetrics},
    data::Batch,
    error::ComputeErr,
    seed::{Stream, rng_for},
};

/// A single feature linear regression trained under MSE, the baseline model
/// of the trainer.
///
/// Validation reports per sample `squared_error`, `abs_error` and `accuracy`,
/// the latter being 1 when the prediction is within `tolerance` of the target.
#[derive(Debug, Clone)]
pub struct LinearRegression {
    layout: ParameterLayout,
    tolerance: f32,
    input_noise: f32,
    training: bool,
}

impl LinearRegression {
    /// Creates a new `LinearRegression`.
    ///
    /// # Arguments
    /// * `tolerance` - The largest absolute error counted as accurate.
    pub fn new(tolerance: f32) -> Self {
        Self {
            layout: ParameterLayout::linear_1d(),
            tolerance,
            input_noise: 0.0,
            training: true,
        }
    }

    /// Jitters every training input uniformly within `±noise`.
    pub fn with_input_noise(mut self, noise: f32) -> Self {
        self.input_noise = noise;
        self
    }

    #[inline]
    pub fn num_params(&self) -> usize {
        self.layout.len()
    }

    #[inline]
    pub fn is_training(&self) -> bool {
        self.training
    }

    /// Draws the initial parameters.
    ///
    /// Every process draws from the same stream, so all start identical.
    pub fn init_params(&self, seed: u64) -> Vec<f32> {
        let mut rng = rng_for(seed, Stream::ModelInit, 0, 0);
        (0..self.num_params())
            .map(|_| rng.random_range(-0.1..0.1))
            .collect()
    }
}

impl ComputeStep for LinearRegression {
    /// The prediction of every sample.
    type Outputs = Vec<f32>;

    fn forward(
        &mut self,
        params: &[f32],
        batch: &Batch,
        rng: &mut StdRng,
    ) -> Result<Self::Outputs, ComputeErr> {
        if params.len() != self.num_params() {
            return Err(format!(
                "expected {} parameters, got {}",
                self.num_params(),
                params.len()
            )
            .into());
        }

        let view = LinearView::new(params, &self.layout);
        let jitter = self.training && self.input_noise > 0.0;

        let preds = batch
            .xs
            .iter()
            .map(|&x| {
                let x = if jitter {
                    x + rng.random_range(-self.input_noise..=self.input_noise)
                } else {
                    x
                };
                view.predict(x)
            })
            .collect();

        Ok(preds)
    }

    fn loss(&self, outputs: &Self::Outputs, batch: &Batch) -> (f32, LossMap) {
        let loss = mse(outputs, &batch.ys);
        (loss, LossMap::from([("mse".to_string(), loss)]))
    }

    fn backward(
        &mut self,
        _params: &[f32],
        outputs: &Self::Outputs,
        batch: &Batch,
        scale: f32,
        grads: &mut [f32],
    ) -> Result<(), ComputeErr> {
        if grads.len() != self.num_params() {
            return Err(format!(
                "expected {} gradients, got {}",
                self.num_params(),
                grads.len()
            )
            .into());
        }

        linreg_mse_grad_accumulate(&self.layout, outputs, &batch.xs, &batch.ys, scale, grads);
        Ok(())
    }

    fn metrics(&self, outputs: &Self::Outputs, batch: &Batch) -> Vec<SampleMetrics> {
        outputs
            .iter()
            .zip(&batch.ys)
            .map(|(p, y)| {
                let err = (p - y).abs();
                SampleMetrics::from([
                    ("abs_error".to_string(), err),
                    ("squared_error".to_string(), err * err),
                    (
                        "accuracy".to_string(),
                        if err <= self.tolerance { 1.0 } else { 0.0 },
                    ),
                ])
            })
            .collect()
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;
    use crate::data::InMemoryDataset;

    #[test]
    fn perfect_fit_is_accurate() {
        let ds = InMemoryDataset::from_xy("v", vec![1.0, 2.0], vec![3.0, 5.5]);
        let batch = ds.batch([0, 1]);
        let mut model = LinearRegression::new(0.25);
        let mut rng = StdRng::seed_from_u64(0);

        let preds = model.forward(&[2.0, 1.0], &batch, &mut rng).unwrap();
        let (loss, named) = model.loss(&preds, &batch);
        assert!((loss - 0.125).abs() < 1e-6);
        assert_eq!(named["mse"], loss);

        let metrics = model.metrics(&preds, &batch);
        assert_eq!(metrics[0]["accuracy"], 1.0);
        assert_eq!(metrics[1]["accuracy"], 0.0);
    }

    #[test]
    fn noise_only_applies_while_training() {
        let ds = InMemoryDataset::from_xy("t", vec![1.0; 8], vec![0.0; 8]);
        let batch = ds.batch(0..8);
        let mut model = LinearRegression::new(0.1).with_input_noise(0.5);
        let mut rng = StdRng::seed_from_u64(7);

        let noisy = model.forward(&[1.0, 0.0], &batch, &mut rng).unwrap();
        assert!(noisy.iter().any(|&p| p != 1.0));

        model.set_training(false);
        let clean = model.forward(&[1.0, 0.0], &batch, &mut rng).unwrap();
        assert!(clean.iter().all(|&p| p == 1.0));
    }

    #[test]
    fn wrong_parameter_count_is_an_error() {
        let batch = Batch::default();
        let mut model = LinearRegression::new(0.1);
        let mut rng = StdRng::seed_from_u64(0);

        assert!(model.forward(&[1.0], &batch, &mut rng).is_err());
    }
}

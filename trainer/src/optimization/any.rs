use super::{Adam, GradientDescent, Optimizer, ParamGroup, optimizer::Result};

/// Either of the shipped optimizers, picked by configuration.
#[derive(Debug)]
pub enum AnyOptimizer {
    Adam(Adam),
    GradientDescent(GradientDescent),
}

impl Optimizer for AnyOptimizer {
    fn param_groups(&self) -> &[ParamGroup] {
        match self {
            Self::Adam(o) => o.param_groups(),
            Self::GradientDescent(o) => o.param_groups(),
        }
    }

    fn param_groups_mut(&mut self) -> &mut [ParamGroup] {
        match self {
            Self::Adam(o) => o.param_groups_mut(),
            Self::GradientDescent(o) => o.param_groups_mut(),
        }
    }

    fn step(&mut self, grads: &[f32], params: &mut [f32]) -> Result<()> {
        match self {
            Self::Adam(o) => o.step(grads, params),
            Self::GradientDescent(o) => o.step(grads, params),
        }
    }

    fn state(&self) -> Vec<f32> {
        match self {
            Self::Adam(o) => o.state(),
            Self::GradientDescent(o) => o.state(),
        }
    }

    fn load_state(&mut self, state: &[f32]) -> Result<()> {
        match self {
            Self::Adam(o) => o.load_state(state),
            Self::GradientDescent(o) => o.load_state(state),
        }
    }
}

use super::{
    Optimizer, ParamGroup, SizeMismatchErr,
    optimizer::{Result, check_sizes, groups_len},
};

#[derive(Debug)]
pub struct GradientDescent {
    groups: Vec<ParamGroup>,
    len: usize,
}

impl GradientDescent {
    /// Creates a new `GradientDescent` optimizer.
    ///
    /// # Arguments
    /// * `len` - The amount of parameters this instance should update.
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    ///
    /// # Returns
    /// A new `GradientDescent` instance.
    pub fn new(len: usize, learning_rate: f32) -> Self {
        let groups = vec![ParamGroup::new(0..len, learning_rate)];
        Self {
            len: groups_len(&groups),
            groups,
        }
    }
}

impl Optimizer for GradientDescent {
    fn param_groups(&self) -> &[ParamGroup] {
        &self.groups
    }

    fn param_groups_mut(&mut self) -> &mut [ParamGroup] {
        &mut self.groups
    }

    fn step(&mut self, grads: &[f32], params: &mut [f32]) -> Result<()> {
        check_sizes(grads, params, self.len)?;

        for group in &self.groups {
            let lr = group.lr;
            let r = group.range.clone();

            for (p, g) in params[r.clone()].iter_mut().zip(&grads[r]) {
                *p -= lr * g;
            }
        }

        Ok(())
    }

    fn state(&self) -> Vec<f32> {
        Vec::new()
    }

    fn load_state(&mut self, state: &[f32]) -> Result<()> {
        if !state.is_empty() {
            return Err(SizeMismatchErr {
                what: "gradient descent state",
                got: state.len(),
                expected: 0,
            });
        }

        Ok(())
    }
}

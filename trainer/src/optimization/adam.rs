use super::{
    Optimizer, ParamGroup, SizeMismatchErr,
    optimizer::{Result, check_sizes, groups_len},
};

#[derive(Debug)]
pub struct Adam {
    groups: Vec<ParamGroup>,
    beta1: f32,
    beta2: f32,
    beta1_t: f32,
    beta2_t: f32,
    v: Box<[f32]>,
    s: Box<[f32]>,
    epsilon: f32,
}

impl Adam {
    /// Creates a new `Adam` optimizer with a single parameter group.
    ///
    /// # Arguments
    /// * `len` - The amount of parameters this instance should hold.
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    /// * `beta1`, `beta2`, `epsilon` - Hyperparameters to the optimization algorithm.
    ///
    /// # Returns
    /// A new `Adam` instance.
    pub fn new(len: usize, learning_rate: f32, beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Self::grouped(
            vec![ParamGroup::new(0..len, learning_rate)],
            beta1,
            beta2,
            epsilon,
        )
    }

    /// Creates a new `Adam` optimizer over the given parameter groups.
    ///
    /// # Arguments
    /// * `groups` - Disjoint parameter ranges, each with its own learning rate.
    /// * `beta1`, `beta2`, `epsilon` - Hyperparameters to the optimization algorithm.
    ///
    /// # Returns
    /// A new `Adam` instance.
    pub fn grouped(groups: Vec<ParamGroup>, beta1: f32, beta2: f32, epsilon: f32) -> Self {
        let len = groups_len(&groups);

        Self {
            groups,
            beta1,
            beta2,
            beta1_t: 1.,
            beta2_t: 1.,
            v: vec![0.; len].into_boxed_slice(),
            s: vec![0.; len].into_boxed_slice(),
            epsilon,
        }
    }
}

impl Optimizer for Adam {
    fn param_groups(&self) -> &[ParamGroup] {
        &self.groups
    }

    fn param_groups_mut(&mut self) -> &mut [ParamGroup] {
        &mut self.groups
    }

    fn step(&mut self, grads: &[f32], params: &mut [f32]) -> Result<()> {
        check_sizes(grads, params, self.v.len())?;

        let Self {
            beta1: b1,
            beta2: b2,
            epsilon: eps,
            ..
        } = *self;

        self.beta1_t *= b1;
        self.beta2_t *= b2;

        let bc1 = 1. - self.beta1_t;
        let bc2 = 1. - self.beta2_t;

        for group in &self.groups {
            let step_size = group.lr * (bc2.sqrt() / bc1);
            let r = group.range.clone();

            params[r.clone()]
                .iter_mut()
                .zip(&grads[r.clone()])
                .zip(self.v[r.clone()].iter_mut())
                .zip(self.s[r].iter_mut())
                .for_each(|(((p, g), v), s)| {
                    *v = b1 * *v + (1. - b1) * g;
                    *s = b2 * *s + (1. - b2) * g.powi(2);
                    *p -= step_size * *v / (s.sqrt() + eps);
                });
        }

        Ok(())
    }

    fn state(&self) -> Vec<f32> {
        let mut state = Vec::with_capacity(2 + self.v.len() + self.s.len());
        state.push(self.beta1_t);
        state.push(self.beta2_t);
        state.extend_from_slice(&self.v);
        state.extend_from_slice(&self.s);
        state
    }

    fn load_state(&mut self, state: &[f32]) -> Result<()> {
        let n = self.v.len();
        let expected = 2 + 2 * n;

        if state.len() != expected {
            return Err(SizeMismatchErr {
                what: "adam state",
                got: state.len(),
                expected,
            });
        }

        let (moments, rest) = state.split_at(2);
        let (v, s) = rest.split_at(n);

        self.beta1_t = moments[0];
        self.beta2_t = moments[1];
        self.v.copy_from_slice(v);
        self.s.copy_from_slice(s);
        Ok(())
    }
}

use rayon::prelude::*;

/// An exponentially decayed shadow copy of the model parameters.
///
/// The shadow is a private buffer, it never aliases the live parameters.
#[derive(Debug, Clone)]
pub struct WeightAverager {
    enabled: bool,
    decay: f32,
    shadow: Vec<f32>,
    initialized: bool,
}

impl WeightAverager {
    /// Creates a new enabled `WeightAverager`.
    ///
    /// # Arguments
    /// * `decay` - The weight of the previous shadow on every update.
    pub fn new(decay: f32) -> Self {
        Self {
            enabled: true,
            decay,
            shadow: Vec::new(),
            initialized: false,
        }
    }

    /// Creates a `WeightAverager` where every operation is a no-op.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            decay: 0.,
            shadow: Vec::new(),
            initialized: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Folds `params` into the shadow.
    ///
    /// The first update copies `params` exactly.
    pub fn update(&mut self, params: &[f32]) {
        if !self.enabled {
            return;
        }

        if !self.initialized || self.shadow.len() != params.len() {
            self.shadow.clear();
            self.shadow.extend_from_slice(params);
            self.initialized = true;
            return;
        }

        let d = self.decay;
        self.shadow
            .par_iter_mut()
            .zip(params.par_iter())
            .for_each(|(s, &p)| *s = d * *s + (1. - d) * p);
    }

    /// Returns the parameters evaluation and checkpointing should use.
    ///
    /// That is the shadow once it holds something, `live` otherwise.
    pub fn view<'a>(&'a self, live: &'a [f32]) -> &'a [f32] {
        match self.export() {
            Some(shadow) => shadow,
            None => live,
        }
    }

    /// Returns the shadow, if enabled and initialized.
    pub fn export(&self) -> Option<&[f32]> {
        (self.enabled && self.initialized).then_some(self.shadow.as_slice())
    }

    /// Replaces the shadow with a previously exported one.
    pub fn restore(&mut self, shadow: &[f32]) {
        if !self.enabled {
            return;
        }

        self.shadow.clear();
        self.shadow.extend_from_slice(shadow);
        self.initialized = true;
    }
}

use std::{error::Error, fmt, ops::Range};

/// The optimizer module's result type.
pub type Result<T> = std::result::Result<T, SizeMismatchErr>;

/// A buffer handed to an optimizer doesn't match the size it was built for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeMismatchErr {
    pub what: &'static str,
    pub got: usize,
    pub expected: usize,
}

impl fmt::Display for SizeMismatchErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} size mismatch: got {}, expected {}",
            self.what, self.got, self.expected
        )
    }
}

impl Error for SizeMismatchErr {}

/// A contiguous range of parameters sharing a learning rate.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamGroup {
    pub range: Range<usize>,
    pub lr: f32,
}

impl ParamGroup {
    pub fn new(range: Range<usize>, lr: f32) -> Self {
        Self { range, lr }
    }
}

/// Defines the strategy for updating model parameters based on accumulated gradients.
pub trait Optimizer {
    /// Returns the parameter groups and their current learning rates.
    fn param_groups(&self) -> &[ParamGroup];

    /// Returns the parameter groups so their learning rate can be rewritten.
    fn param_groups_mut(&mut self) -> &mut [ParamGroup];

    /// Updates the provided slice of parameters using the accumulated gradients.
    ///
    /// # Arguments
    /// * `grads` - The accumulated gradient of the whole group of iterations.
    /// * `params` - The parameters to update.
    ///
    /// # Returns
    /// An error if there's a mismatch in the sizes of `grads` and `params`.
    fn step(&mut self, grads: &[f32], params: &mut [f32]) -> Result<()>;

    /// Flattens the internal state so it can be checkpointed.
    fn state(&self) -> Vec<f32>;

    /// Restores a state previously produced by `state`.
    ///
    /// # Returns
    /// An error if `state` was produced by an optimizer of a different size.
    fn load_state(&mut self, state: &[f32]) -> Result<()>;
}

/// Checks that `grads` and `params` both hold exactly `expected` values.
pub(super) fn check_sizes(grads: &[f32], params: &[f32], expected: usize) -> Result<()> {
    for (what, got) in [("gradient", grads.len()), ("parameters", params.len())] {
        if got != expected {
            return Err(SizeMismatchErr {
                what,
                got,
                expected,
            });
        }
    }

    Ok(())
}

/// Returns the amount of parameters covered by `groups`.
pub(super) fn groups_len(groups: &[ParamGroup]) -> usize {
    groups.iter().map(|group| group.range.end).max().unwrap_or(0)
}

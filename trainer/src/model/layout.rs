use std::ops::Range;

/// Where each named tensor of a model sits within the flat parameter buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterLayout {
    pub w: Range<usize>,
    pub b: Range<usize>,
}

impl ParameterLayout {
    /// The layout of a single feature linear regression: `[w, b]`.
    pub fn linear_1d() -> Self {
        Self {
            w: 0..1,
            b: 1..2,
        }
    }

    /// The total amount of parameters of the layout.
    pub fn len(&self) -> usize {
        self.w.len() + self.b.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

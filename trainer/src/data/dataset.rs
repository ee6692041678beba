use comms::SampleId;

/// A minimal in-memory dataset of scalar (x, y) samples with stable identities.
#[derive(Debug, Clone)]
pub struct InMemoryDataset {
    ids: Vec<SampleId>,
    xs: Vec<f32>,
    ys: Vec<f32>,
}

impl InMemoryDataset {
    /// Creates a new dataset from owned buffers.
    ///
    /// # Panics
    /// - if `ids`, `xs` and `ys` don't have the same length
    pub fn new(ids: Vec<SampleId>, xs: Vec<f32>, ys: Vec<f32>) -> Self {
        assert_eq!(xs.len(), ys.len(), "xs and ys must have same length");
        assert_eq!(ids.len(), xs.len(), "every sample needs an id");
        Self { ids, xs, ys }
    }

    /// Creates a new dataset naming every sample after its position.
    pub fn from_xy(prefix: &str, xs: Vec<f32>, ys: Vec<f32>) -> Self {
        let ids = (0..xs.len())
            .map(|i| SampleId::new(format!("{prefix}_{i:06}")))
            .collect();

        Self::new(ids, xs, ys)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.xs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.xs.is_empty()
    }

    /// The identities of every sample, in dataset order.
    #[inline]
    pub fn ids(&self) -> &[SampleId] {
        &self.ids
    }

    /// Copies the samples at `indices` into an owned batch.
    ///
    /// # Panics
    /// - if any index is out of bounds
    pub fn batch<I>(&self, indices: I) -> Batch
    where
        I: IntoIterator<Item = usize>,
    {
        let mut batch = Batch::default();

        for i in indices {
            batch.ids.push(self.ids[i].clone());
            batch.xs.push(self.xs[i]);
            batch.ys.push(self.ys[i]);
        }

        batch
    }
}

/// An owned batch of training data, tagged with the identity of each sample.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    pub ids: Vec<SampleId>,
    pub xs: Vec<f32>,
    pub ys: Vec<f32>,
}

impl Batch {
    #[inline]
    pub fn len(&self) -> usize {
        self.xs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.xs.is_empty()
    }

    #[inline]
    pub fn ids(&self) -> &[SampleId] {
        &self.ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_copies_selected_samples() {
        let ds = InMemoryDataset::from_xy("train", vec![1.0, 2.0, 3.0], vec![3.0, 5.0, 7.0]);
        let b = ds.batch([2, 0]);

        assert_eq!(b.len(), 2);
        assert_eq!(b.xs, vec![3.0, 1.0]);
        assert_eq!(b.ys, vec![7.0, 3.0]);
        assert_eq!(b.ids()[0].as_str(), "train_000002");
    }
}

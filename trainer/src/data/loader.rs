use std::ops::Range;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use super::{Batch, InMemoryDataset, ShardSpec};
use crate::{
    error::ConfigErr,
    seed::{Stream, rng_for},
};

/// How a process walks its shard of the training set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoaderKind {
    /// In shard order, endlessly.
    #[default]
    Sequential,
    /// A fresh seeded permutation of the shard on every pass.
    Shuffled,
}

/// Endless, deterministic batches of a process' training shard.
///
/// The n-th batch only depends on the dataset, the shard, the seed and n,
/// so a resumed run sees the same batches an uninterrupted one would.
#[derive(Debug, Clone)]
pub enum TrainLoader {
    Sequential(SequentialLoader),
    Shuffled(ShuffledLoader),
}

impl TrainLoader {
    /// Creates the loader of the given kind.
    ///
    /// # Arguments
    /// * `kind` - The sample order to use.
    /// * `dataset` - The whole training set.
    /// * `shard` - The part of the dataset owned by this process.
    /// * `batch_size` - The amount of samples per batch.
    /// * `seed` - The run's global seed.
    ///
    /// # Returns
    /// The loader, or an error if the shard is empty or `batch_size` is zero.
    pub fn new(
        kind: LoaderKind,
        dataset: InMemoryDataset,
        shard: ShardSpec,
        batch_size: usize,
        seed: u64,
    ) -> Result<Self, ConfigErr> {
        let window = Window::new(dataset, shard, batch_size)?;

        Ok(match kind {
            LoaderKind::Sequential => Self::Sequential(SequentialLoader { window }),
            LoaderKind::Shuffled => Self::Shuffled(ShuffledLoader {
                window,
                seed,
                rank: shard.rank,
                epoch: None,
                order: Vec::new(),
            }),
        })
    }

    /// Returns the next batch.
    pub fn next_batch(&mut self) -> Batch {
        match self {
            Self::Sequential(loader) => loader.next_batch(),
            Self::Shuffled(loader) => loader.next_batch(),
        }
    }

    /// Positions the loader as if `batches` batches had already been taken.
    pub fn seek(&mut self, batches: u64) {
        let window = match self {
            Self::Sequential(loader) => &mut loader.window,
            Self::Shuffled(loader) => &mut loader.window,
        };

        window.position = batches * window.batch_size as u64;
    }
}

/// The shard and the running position shared by every loader kind.
#[derive(Debug, Clone)]
struct Window {
    dataset: InMemoryDataset,
    shard: Range<usize>,
    batch_size: usize,
    /// Samples taken so far, across passes.
    position: u64,
}

impl Window {
    fn new(dataset: InMemoryDataset, shard: ShardSpec, batch_size: usize) -> Result<Self, ConfigErr> {
        if batch_size == 0 {
            return Err(ConfigErr::InvalidValue {
                name: "batch_size",
                reason: "must be positive".to_string(),
            });
        }

        // Decided on the global sizes so every rank fails before the rendezvous alike.
        if dataset.len() < shard.world_size {
            return Err(ConfigErr::InvalidValue {
                name: "training set",
                reason: format!(
                    "has {} samples, fewer than the {} processes",
                    dataset.len(),
                    shard.world_size
                ),
            });
        }

        let shard = shard.range(dataset.len());

        Ok(Self {
            dataset,
            shard,
            batch_size,
            position: 0,
        })
    }

    #[inline]
    fn shard_len(&self) -> u64 {
        self.shard.len() as u64
    }
}

#[derive(Debug, Clone)]
pub struct SequentialLoader {
    window: Window,
}

impl SequentialLoader {
    fn next_batch(&mut self) -> Batch {
        let w = &mut self.window;
        let n = w.shard_len();
        let start = w.position;
        w.position += w.batch_size as u64;

        let indices = (start..w.position).map(|pos| w.shard.start + (pos % n) as usize);
        w.dataset.batch(indices)
    }
}

#[derive(Debug, Clone)]
pub struct ShuffledLoader {
    window: Window,
    seed: u64,
    rank: usize,
    epoch: Option<u64>,
    order: Vec<usize>,
}

impl ShuffledLoader {
    fn next_batch(&mut self) -> Batch {
        let n = self.window.shard_len();
        let start = self.window.position;
        self.window.position += self.window.batch_size as u64;

        let mut indices = Vec::with_capacity(self.window.batch_size);
        for pos in start..self.window.position {
            self.shuffle_for(pos / n);
            indices.push(self.order[(pos % n) as usize]);
        }

        self.window.dataset.batch(indices)
    }

    /// Makes `order` the permutation of the shard for `epoch`.
    fn shuffle_for(&mut self, epoch: u64) {
        if self.epoch == Some(epoch) {
            return;
        }

        self.order.clear();
        self.order.extend(self.window.shard.clone());

        let mut rng = rng_for(self.seed, Stream::Sampler, self.rank, epoch);
        self.order.shuffle(&mut rng);
        self.epoch = Some(epoch);
    }
}

/// Single sample batches of a process' shard of the validation set.
///
/// # Arguments
/// * `dataset` - The whole validation set.
/// * `shard` - The part of the dataset owned by this process.
pub fn validation_batches(
    dataset: &InMemoryDataset,
    shard: ShardSpec,
) -> impl Iterator<Item = Batch> + '_ {
    shard
        .range(dataset.len())
        .map(move |i| dataset.batch([i]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset() -> InMemoryDataset {
        InMemoryDataset::from_xy(
            "s",
            (0..10).map(|i| i as f32).collect(),
            (0..10).map(|i| (i as f32) + 100.0).collect(),
        )
    }

    #[test]
    fn sequential_wraps_around_the_shard() {
        let shard = ShardSpec::new(1, 3); // 4..7
        let mut loader = TrainLoader::new(LoaderKind::Sequential, dataset(), shard, 2, 0).unwrap();

        assert_eq!(loader.next_batch().xs, vec![4.0, 5.0]);
        assert_eq!(loader.next_batch().xs, vec![6.0, 4.0]);
        assert_eq!(loader.next_batch().ys, vec![105.0, 106.0]);
    }

    #[test]
    fn shuffled_is_a_permutation_per_pass() {
        let shard = ShardSpec::new(0, 1);
        let mut loader = TrainLoader::new(LoaderKind::Shuffled, dataset(), shard, 5, 3).unwrap();

        let mut pass: Vec<f32> = loader.next_batch().xs;
        pass.extend(loader.next_batch().xs);
        pass.sort_by(f32::total_cmp);

        let expected: Vec<f32> = (0..10).map(|i| i as f32).collect();
        assert_eq!(pass, expected);
    }

    #[test]
    fn seek_matches_an_uninterrupted_loader() {
        for kind in [LoaderKind::Sequential, LoaderKind::Shuffled] {
            let shard = ShardSpec::new(0, 2);

            let mut straight = TrainLoader::new(kind, dataset(), shard, 3, 11).unwrap();
            let batches: Vec<_> = (0..7).map(|_| straight.next_batch()).collect();

            let mut resumed = TrainLoader::new(kind, dataset(), shard, 3, 11).unwrap();
            resumed.seek(4);
            let tail: Vec<_> = (0..3).map(|_| resumed.next_batch()).collect();

            assert_eq!(&batches[4..], &tail[..]);
        }
    }

    #[test]
    fn every_rank_rejects_a_set_smaller_than_the_world() {
        let tiny = InMemoryDataset::from_xy("s", vec![1.0, 2.0], vec![1.0, 2.0]);

        for rank in [0, 3] {
            let res =
                TrainLoader::new(LoaderKind::Sequential, tiny.clone(), ShardSpec::new(rank, 4), 1, 0);
            assert!(
                matches!(res, Err(ConfigErr::InvalidValue { name: "training set", .. })),
                "rank {rank} accepted a set of 2 samples over 4 processes"
            );
        }

        let res = TrainLoader::new(LoaderKind::Sequential, tiny, ShardSpec::new(1, 2), 1, 0);
        assert!(res.is_ok());
    }

    #[test]
    fn validation_batches_cover_the_shard_one_by_one() {
        let ds = dataset();
        let batches: Vec<_> = validation_batches(&ds, ShardSpec::new(2, 3)).collect();

        assert_eq!(batches.len(), 3);
        assert!(batches.iter().all(|b| b.len() == 1));
        assert_eq!(batches[0].ids()[0].as_str(), "s_000007");
    }
}

mod dataset;
mod loader;
mod shard;

pub use dataset::{Batch, InMemoryDataset};
pub use loader::{LoaderKind, SequentialLoader, ShuffledLoader, TrainLoader, validation_batches};
pub use shard::{ShardSpec, shard_range};

use rand::{SeedableRng, rngs::StdRng};
use sha2::{Digest, Sha256};

/// The independent random streams of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    /// Randomness inside the training forward pass, such as dropout.
    Forward,
    /// Randomness inside the forward passes of a validation cycle.
    Validation,
    /// Initial model parameters.
    ModelInit,
    /// Order of the training samples.
    Sampler,
}

impl Stream {
    fn tag(self) -> &'static str {
        match self {
            Stream::Forward => "forward",
            Stream::Validation => "validation",
            Stream::ModelInit => "model_init",
            Stream::Sampler => "sampler",
        }
    }
}

/// Derives a 32 byte seed as a pure function of its arguments.
///
/// # Arguments
/// * `seed` - The run's global seed.
/// * `stream` - Which random stream the seed is for.
/// * `rank` - The process rank.
/// * `index` - The iteration, epoch, or any other position within the stream.
pub fn derive_seed(seed: u64, stream: Stream, rank: usize, index: u64) -> [u8; 32] {
    let key = format!("{}_{seed}_{rank}_{index}", stream.tag());
    Sha256::digest(key.as_bytes()).into()
}

/// Creates the generator for the given position of a random stream.
pub fn rng_for(seed: u64, stream: Stream, rank: usize, index: u64) -> StdRng {
    StdRng::from_seed(derive_seed(seed, stream, rank, index))
}

#[cfg(test)]
mod tests {
    use rand::Rng;

    use super::*;

    #[test]
    fn same_inputs_same_stream() {
        let a: Vec<u32> = rng_for(7, Stream::Forward, 1, 42).random_iter().take(4).collect();
        let b: Vec<u32> = rng_for(7, Stream::Forward, 1, 42).random_iter().take(4).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn every_input_changes_the_seed() {
        let base = derive_seed(7, Stream::Forward, 1, 42);

        assert_ne!(base, derive_seed(8, Stream::Forward, 1, 42));
        assert_ne!(base, derive_seed(7, Stream::Sampler, 1, 42));
        assert_ne!(base, derive_seed(7, Stream::Validation, 1, 42));
        assert_ne!(base, derive_seed(7, Stream::Forward, 2, 42));
        assert_ne!(base, derive_seed(7, Stream::Forward, 1, 43));
    }
}

use std::{fs, path::Path};

use anyhow::{Context, Result, bail};
use comms::SampleId;
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::Deserialize;
use trainer::data::InMemoryDataset;

/// A dataset file: parallel arrays of inputs, targets and optional sample ids.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Samples {
    #[serde(default)]
    ids: Option<Vec<String>>,
    xs: Vec<f32>,
    ys: Vec<f32>,
}

/// Loads a JSON dataset file.
///
/// Samples without ids are named after `prefix` and their position.
pub fn load(path: &Path, prefix: &str) -> Result<InMemoryDataset> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("couldn't read dataset {}", path.display()))?;

    let Samples { ids, xs, ys } = serde_json::from_str(&content)
        .with_context(|| format!("malformed dataset {}", path.display()))?;

    if xs.len() != ys.len() {
        bail!("{}: {} inputs but {} targets", path.display(), xs.len(), ys.len());
    }

    match ids {
        None => Ok(InMemoryDataset::from_xy(prefix, xs, ys)),
        Some(ids) if ids.len() == xs.len() => Ok(InMemoryDataset::new(
            ids.into_iter().map(SampleId::new).collect(),
            xs,
            ys,
        )),
        Some(ids) => bail!("{}: {} ids for {} samples", path.display(), ids.len(), xs.len()),
    }
}

/// Samples `n` noisy points of y = 2x + 1 with x in [0, 1).
///
/// Every process draws the same samples for the same `seed` and `split`.
pub fn synthetic(prefix: &str, n: usize, seed: u64, split: u64) -> InMemoryDataset {
    let mut rng = StdRng::seed_from_u64(seed.wrapping_add(split));

    let xs: Vec<f32> = (0..n).map(|_| rng.random_range(0.0..1.0)).collect();
    let ys = xs
        .iter()
        .map(|x| 2.0 * x + 1.0 + rng.random_range(-0.05..0.05))
        .collect();

    InMemoryDataset::from_xy(prefix, xs, ys)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_with_and_without_ids() {
        let dir = tempfile::tempdir().unwrap();

        let plain = dir.path().join("plain.json");
        fs::write(&plain, r#"{ "xs": [1.0, 2.0], "ys": [3.0, 5.0] }"#).unwrap();
        let ds = load(&plain, "train").unwrap();
        assert_eq!(ds.ids()[1].as_str(), "train_000001");

        let named = dir.path().join("named.json");
        fs::write(&named, r#"{ "ids": ["a", "b"], "xs": [1.0, 2.0], "ys": [3.0, 5.0] }"#).unwrap();
        assert_eq!(load(&named, "train").unwrap().ids()[0].as_str(), "a");

        let broken = dir.path().join("broken.json");
        fs::write(&broken, r#"{ "xs": [1.0], "ys": [] }"#).unwrap();
        assert!(load(&broken, "train").is_err());
    }

    #[test]
    fn synthetic_is_reproducible() {
        let a = synthetic("val", 16, 7, 1);
        let b = synthetic("val", 16, 7, 1);
        let c = synthetic("val", 16, 7, 2);

        assert_eq!(a.batch(0..16), b.batch(0..16));
        assert_ne!(a.batch(0..16), c.batch(0..16));
    }
}

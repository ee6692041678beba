//! The on-disk format of a checkpoint.
//!
//! A safetensors file with up to three flat `f32` tensors and the checkpoint
//! tags stored as string metadata:
//!
//! | tensor      | content                                   |
//! |-------------|-------------------------------------------|
//! | `model`     | live model parameters                     |
//! | `optimizer` | optimizer state, absent when it is empty  |
//! | `averaged`  | weight averaged parameters, when enabled  |

use std::{
    collections::HashMap,
    fs::File,
    io::{self, Read},
    path::Path,
};

use safetensors::{
    SafeTensors,
    tensor::{Dtype, TensorView},
};

use crate::error::CheckpointErr;

const MODEL: &str = "model";
const OPTIMIZER: &str = "optimizer";
const AVERAGED: &str = "averaged";

const ITERATION: &str = "iteration";
const VALIDATION_METRIC: &str = "validation_metric";
const IS_VALIDATION: &str = "is_validation";
const CREATED_AT: &str = "created_at";

/// The tags of a checkpoint, readable without loading its tensors.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointMeta {
    pub iteration: u64,
    pub validation_metric: Option<f32>,
    pub is_validation: bool,
    /// Seconds since the unix epoch.
    pub created_at: u64,
}

/// A fully loaded checkpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub meta: CheckpointMeta,
    pub model: Vec<f32>,
    pub optimizer: Vec<f32>,
    pub averaged: Option<Vec<f32>>,
}

impl CheckpointMeta {
    fn to_map(&self) -> HashMap<String, String> {
        let mut map = HashMap::from([
            (ITERATION.to_string(), self.iteration.to_string()),
            (IS_VALIDATION.to_string(), self.is_validation.to_string()),
            (CREATED_AT.to_string(), self.created_at.to_string()),
        ]);

        if let Some(metric) = self.validation_metric {
            map.insert(VALIDATION_METRIC.to_string(), metric.to_string());
        }

        map
    }

    fn from_map(map: &HashMap<String, String>, path: &Path) -> Result<Self, CheckpointErr> {
        let field = |key: &str| {
            map.get(key).ok_or_else(|| format_err(path, format!("missing `{key}` metadata")))
        };

        let parse_err = |key: &str, e: &dyn std::fmt::Display| {
            format_err(path, format!("invalid `{key}` metadata: {e}"))
        };

        let iteration = field(ITERATION)?
            .parse()
            .map_err(|e| parse_err(ITERATION, &e))?;

        let is_validation = field(IS_VALIDATION)?
            .parse()
            .map_err(|e| parse_err(IS_VALIDATION, &e))?;

        let created_at = field(CREATED_AT)?
            .parse()
            .map_err(|e| parse_err(CREATED_AT, &e))?;

        let validation_metric = match map.get(VALIDATION_METRIC) {
            Some(raw) => Some(
                raw.parse()
                    .map_err(|e| parse_err(VALIDATION_METRIC, &e))?,
            ),
            None => None,
        };

        Ok(Self {
            iteration,
            validation_metric,
            is_validation,
            created_at,
        })
    }
}

fn format_err(path: &Path, reason: impl Into<String>) -> CheckpointErr {
    CheckpointErr::Format {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

/// Serializes a checkpoint into a safetensors buffer.
///
/// # Arguments
/// * `meta` - The tags of the checkpoint.
/// * `model` - The live model parameters.
/// * `optimizer` - The flattened optimizer state.
/// * `averaged` - The weight averaged parameters, if any.
/// * `path` - Where the buffer will be written, only used for errors.
pub fn encode(
    meta: &CheckpointMeta,
    model: &[f32],
    optimizer: &[f32],
    averaged: Option<&[f32]>,
    path: &Path,
) -> Result<Vec<u8>, CheckpointErr> {
    let mut tensors = vec![(MODEL, model)];
    if !optimizer.is_empty() {
        tensors.push((OPTIMIZER, optimizer));
    }
    if let Some(averaged) = averaged {
        tensors.push((AVERAGED, averaged));
    }

    let views = tensors
        .into_iter()
        .map(|(name, values)| {
            let bytes = bytemuck::cast_slice::<f32, u8>(values);
            TensorView::new(Dtype::F32, vec![values.len()], bytes)
                .map(|view| (name, view))
                .map_err(|e| format_err(path, e.to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    safetensors::serialize(views, &Some(meta.to_map())).map_err(|e| format_err(path, e.to_string()))
}

/// Deserializes a whole checkpoint.
///
/// # Arguments
/// * `bytes` - The content of a checkpoint file.
/// * `path` - The file the content was read from, only used for errors.
pub fn decode(bytes: &[u8], path: &Path) -> Result<Checkpoint, CheckpointErr> {
    let tensors = SafeTensors::deserialize(bytes).map_err(|e| format_err(path, e.to_string()))?;
    let (_, metadata) =
        SafeTensors::read_metadata(bytes).map_err(|e| format_err(path, e.to_string()))?;

    let meta = match metadata.metadata() {
        Some(map) => CheckpointMeta::from_map(map, path)?,
        None => return Err(format_err(path, "missing metadata")),
    };

    let tensor = |name: &'static str| -> Result<Option<Vec<f32>>, CheckpointErr> {
        let names = tensors.names();
        if !names.iter().any(|n| n.as_str() == name) {
            return Ok(None);
        }

        let view = tensors
            .tensor(name)
            .map_err(|e| format_err(path, e.to_string()))?;

        if view.dtype() != Dtype::F32 {
            return Err(format_err(path, format!("`{name}` is not an f32 tensor")));
        }

        Ok(Some(bytemuck::pod_collect_to_vec::<u8, f32>(view.data())))
    };

    let model = tensor(MODEL)?.ok_or_else(|| CheckpointErr::MissingTensor {
        path: path.to_path_buf(),
        name: MODEL,
    })?;

    Ok(Checkpoint {
        meta,
        model,
        optimizer: tensor(OPTIMIZER)?.unwrap_or_default(),
        averaged: tensor(AVERAGED)?,
    })
}

/// Reads the tags of the checkpoint at `path` without loading its tensors.
///
/// Only the safetensors header is read: an 8 byte little endian length
/// followed by that many bytes of json.
pub fn read_meta(path: &Path) -> Result<CheckpointMeta, CheckpointErr> {
    let io_err = |source: io::Error| CheckpointErr::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut file = File::open(path).map_err(io_err)?;

    let mut len_buf = [0u8; 8];
    file.read_exact(&mut len_buf).map_err(io_err)?;
    let len = u64::from_le_bytes(len_buf);

    let file_len = file.metadata().map_err(io_err)?.len();
    if len > file_len.saturating_sub(8) {
        return Err(format_err(path, format!("header length {len} exceeds the file")));
    }

    let mut header = vec![0u8; len as usize];
    file.read_exact(&mut header).map_err(io_err)?;

    #[derive(serde::Deserialize)]
    struct Header {
        #[serde(rename = "__metadata__")]
        metadata: Option<HashMap<String, String>>,
    }

    let header: Header =
        serde_json::from_slice(&header).map_err(|e| format_err(path, e.to_string()))?;

    match header.metadata {
        Some(map) => CheckpointMeta::from_map(&map, path),
        None => Err(format_err(path, "missing metadata")),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn meta(metric: Option<f32>) -> CheckpointMeta {
        CheckpointMeta {
            iteration: 12,
            validation_metric: metric,
            is_validation: metric.is_some(),
            created_at: 1_700_000_000,
        }
    }

    #[test]
    fn optional_tensors_and_metric_survive() {
        let path = PathBuf::from("000012.safetensors");

        let bytes = encode(&meta(None), &[1.0, 2.0], &[], None, &path).unwrap();
        let ckpt = decode(&bytes, &path).unwrap();
        assert_eq!(ckpt.meta, meta(None));
        assert!(ckpt.optimizer.is_empty());
        assert_eq!(ckpt.averaged, None);

        let bytes = encode(&meta(Some(0.8125)), &[1.0], &[0.5, 0.25], Some(&[3.0][..]), &path).unwrap();
        let ckpt = decode(&bytes, &path).unwrap();
        assert_eq!(ckpt.meta.validation_metric, Some(0.8125));
        assert_eq!(ckpt.optimizer, vec![0.5, 0.25]);
        assert_eq!(ckpt.averaged, Some(vec![3.0]));
    }

    #[test]
    fn header_only_read_matches_full_decode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("000012.safetensors");

        let bytes = encode(&meta(Some(0.5)), &[1.0; 64], &[2.0; 130], None, &path).unwrap();
        std::fs::write(&path, &bytes).unwrap();

        assert_eq!(read_meta(&path).unwrap(), decode(&bytes, &path).unwrap().meta);
    }

    #[test]
    fn garbage_is_a_format_error() {
        let path = PathBuf::from("broken.safetensors");
        let err = decode(b"definitely not a checkpoint", &path).unwrap_err();
        assert!(matches!(err, CheckpointErr::Format { .. }));
    }
}

//! Checkpoint loading and the read-only checkpoint store.
//!
//! Checkpoints are safetensors containers: a flat map from parameter name to
//! tensor. One level of wrapping is represented with a dotted prefix, so a
//! training script that saved `{"state_dict": weights, ...}` produces names
//! like `state_dict.conv1.weight`. A map counts as a container only when every
//! name sits under a container key; loading then unwraps `state_dict` first,
//! then `model`. Any other map is returned as-is.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use ndarray::{ArrayD, IxDyn};
use safetensors::tensor::{Dtype, SafeTensors, TensorView};
use thiserror::Error;

use super::catalog::{ModelSlot, Subtype};

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("Checkpoint not found: {0}")]
    NotFound(PathBuf),

    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt checkpoint container: {0}")]
    Corrupt(String),

    #[error("Tensor '{name}' has unsupported dtype {dtype}")]
    UnsupportedDtype { name: String, dtype: String },

    #[error("Tensor '{name}': {reason}")]
    InvalidTensor { name: String, reason: String },

    #[error("Checkpoint contains no tensors")]
    Empty,

    #[error("No checkpoint configured for {0}")]
    NotConfigured(String),
}

// ═══════════════════════════════════════════════════════════
// StateDict
// ═══════════════════════════════════════════════════════════

/// Known one-level container keys, in unwrap priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKey {
    StateDict,
    Model,
}

impl ContainerKey {
    pub const PRIORITY: [ContainerKey; 2] = [ContainerKey::StateDict, ContainerKey::Model];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerKey::StateDict => "state_dict",
            ContainerKey::Model => "model",
        }
    }

    fn prefix(&self) -> String {
        format!("{}.", self.as_str())
    }
}

/// Parameter-name → tensor map, already unwrapped from any container.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateDict {
    tensors: BTreeMap<String, ArrayD<f32>>,
    unwrapped_from: Option<ContainerKey>,
}

impl StateDict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tensors(tensors: BTreeMap<String, ArrayD<f32>>) -> Self {
        Self {
            tensors,
            unwrapped_from: None,
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, tensor: ArrayD<f32>) {
        self.tensors.insert(name.into(), tensor);
    }

    pub fn get(&self, name: &str) -> Option<&ArrayD<f32>> {
        self.tensors.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tensors.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tensors.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Container key the weights were unwrapped from, if any.
    pub fn unwrapped_from(&self) -> Option<ContainerKey> {
        self.unwrapped_from
    }
}

// ═══════════════════════════════════════════════════════════
// Loading
// ═══════════════════════════════════════════════════════════

/// Read and unwrap a checkpoint file. Missing files are an error, never an
/// empty state dict.
pub fn load_checkpoint(path: &Path) -> Result<StateDict, CheckpointError> {
    if !path.exists() {
        return Err(CheckpointError::NotFound(path.to_path_buf()));
    }
    let bytes = std::fs::read(path).map_err(|source| CheckpointError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let state = parse_checkpoint(&bytes)?;

    tracing::debug!(
        path = %path.display(),
        tensors = state.len(),
        container = state.unwrapped_from().map(|k| k.as_str()),
        "Checkpoint loaded"
    );

    Ok(state)
}

/// Parse safetensors bytes into an unwrapped `StateDict`.
pub fn parse_checkpoint(bytes: &[u8]) -> Result<StateDict, CheckpointError> {
    let container =
        SafeTensors::deserialize(bytes).map_err(|e| CheckpointError::Corrupt(e.to_string()))?;

    let mut raw = BTreeMap::new();
    for (name, view) in container.tensors() {
        let tensor = tensor_to_array(&name, &view)?;
        raw.insert(name, tensor);
    }

    if raw.is_empty() {
        return Err(CheckpointError::Empty);
    }

    Ok(unwrap_container(raw))
}

/// Unwrap one container level: `state_dict` wins over `model`. A map with
/// any name outside the container keys is a plain state dict.
fn unwrap_container(raw: BTreeMap<String, ArrayD<f32>>) -> StateDict {
    let under = |key: ContainerKey, name: &str| name.starts_with(&key.prefix());
    let is_container = raw
        .keys()
        .all(|name| ContainerKey::PRIORITY.iter().any(|key| under(*key, name)));
    let chosen = ContainerKey::PRIORITY
        .into_iter()
        .find(|key| raw.keys().any(|name| under(*key, name)));

    match chosen {
        Some(key) if is_container => {
            let prefix = key.prefix();
            let tensors = raw
                .into_iter()
                .filter_map(|(name, tensor)| {
                    name.strip_prefix(&prefix)
                        .map(|inner| (inner.to_string(), tensor))
                })
                .collect();
            StateDict {
                tensors,
                unwrapped_from: Some(key),
            }
        }
        _ => StateDict::from_tensors(raw),
    }
}

fn tensor_to_array(name: &str, view: &TensorView<'_>) -> Result<ArrayD<f32>, CheckpointError> {
    let data = view.data();
    let values: Vec<f32> = match view.dtype() {
        Dtype::F32 => data
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
        Dtype::F64 => data
            .chunks_exact(8)
            .map(|b| f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]) as f32)
            .collect(),
        // BatchNorm's num_batches_tracked is an integer counter.
        Dtype::I64 => data
            .chunks_exact(8)
            .map(|b| i64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]) as f32)
            .collect(),
        other => {
            return Err(CheckpointError::UnsupportedDtype {
                name: name.to_string(),
                dtype: format!("{other:?}"),
            })
        }
    };

    ArrayD::from_shape_vec(IxDyn(view.shape()), values).map_err(|e| {
        CheckpointError::InvalidTensor {
            name: name.to_string(),
            reason: e.to_string(),
        }
    })
}

/// Write a state dict as an `f32` safetensors file, optionally wrapped under a
/// container key. Used by tooling and test fixtures; the cascade never writes.
pub fn save_checkpoint(
    path: &Path,
    state: &StateDict,
    wrap: Option<ContainerKey>,
) -> Result<(), CheckpointError> {
    let prefix = wrap.map(|k| k.prefix()).unwrap_or_default();

    let buffers: Vec<(String, Vec<usize>, Vec<u8>)> = state
        .tensors
        .iter()
        .map(|(name, tensor)| {
            let bytes = tensor.iter().flat_map(|v| v.to_le_bytes()).collect();
            (format!("{prefix}{name}"), tensor.shape().to_vec(), bytes)
        })
        .collect();

    let mut views = Vec::with_capacity(buffers.len());
    for (name, shape, bytes) in &buffers {
        let view = TensorView::new(Dtype::F32, shape.clone(), bytes).map_err(|e| {
            CheckpointError::InvalidTensor {
                name: name.clone(),
                reason: e.to_string(),
            }
        })?;
        views.push((name.as_str(), view));
    }

    let metadata: Option<HashMap<String, String>> = None;
    let encoded = safetensors::tensor::serialize(views, &metadata)
        .map_err(|e| CheckpointError::Corrupt(e.to_string()))?;

    std::fs::write(path, encoded).map_err(|source| CheckpointError::Io {
        path: path.to_path_buf(),
        source,
    })
}

// ═══════════════════════════════════════════════════════════
// CheckpointStore
// ═══════════════════════════════════════════════════════════

/// Static slot → file mapping, fixed at deployment. Read-only at runtime.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    modality: PathBuf,
    family: PathBuf,
    subtype_router: PathBuf,
    finals: BTreeMap<Subtype, PathBuf>,
    seizure: Option<PathBuf>,
}

impl CheckpointStore {
    pub fn new(
        modality: PathBuf,
        family: PathBuf,
        subtype_router: PathBuf,
        finals: BTreeMap<Subtype, PathBuf>,
        seizure: Option<PathBuf>,
    ) -> Self {
        Self {
            modality,
            family,
            subtype_router,
            finals,
            seizure,
        }
    }

    /// Path for a slot. Every subtype is expected to be configured; a gap is
    /// reported rather than guessed.
    pub fn path_for(&self, slot: ModelSlot) -> Result<&Path, CheckpointError> {
        match slot {
            ModelSlot::Modality => Ok(&self.modality),
            ModelSlot::Family => Ok(&self.family),
            ModelSlot::SubtypeRouter => Ok(&self.subtype_router),
            ModelSlot::Final(subtype) => self
                .finals
                .get(&subtype)
                .map(PathBuf::as_path)
                .ok_or_else(|| CheckpointError::NotConfigured(slot.to_string())),
            ModelSlot::Seizure => self
                .seizure
                .as_deref()
                .ok_or_else(|| CheckpointError::NotConfigured(slot.to_string())),
        }
    }

    pub fn has_seizure(&self) -> bool {
        self.seizure.is_some()
    }
}

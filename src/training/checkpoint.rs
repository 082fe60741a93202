/// Model records and training checkpoints with safetensors
///
/// A record is a safetensors file: the tensors are the model's state dict
/// (plus optimizer tensors under `optimizer_state_dict.`), and the string
/// header carries the JSON-encoded configuration, dictionary and training
/// progress.
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use candle_core::{Device, Tensor};
use candle_nn::ParamsAdamW;
use safetensors::SafeTensors;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::models::LanguageModel;
use crate::LmError;

/// Header keys
pub mod keys {
    pub const DICTIONARY: &str = "dictionary";
    pub const IS_FORWARD_LM: &str = "is_forward_lm";
    pub const HIDDEN_SIZE: &str = "hidden_size";
    pub const NLAYERS: &str = "nlayers";
    pub const EMBEDDING_SIZE: &str = "embedding_size";
    pub const NOUT: &str = "nout";
    pub const DROPOUT: &str = "dropout";
    pub const OPTIMIZER_STATE_DICT: &str = "optimizer_state_dict";
    pub const EPOCH: &str = "epoch";
    pub const SPLIT: &str = "split";
    pub const LOSS: &str = "loss";
}

/// Tensor-name prefix for optimizer tensors
pub const OPTIMIZER_PREFIX: &str = "optimizer_state_dict.";

/// Training progress stored next to the weights
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CheckpointMetadata {
    pub epoch: Option<usize>,
    pub split: Option<usize>,
    pub loss: Option<f64>,
}

/// Opaque optimizer snapshot
///
/// Scalars hold hyper-parameters and counters; tensors hold per-parameter
/// buffers such as moment estimates.
#[derive(Debug, Clone, Default)]
pub struct OptimizerState {
    pub scalars: BTreeMap<String, f64>,
    pub tensors: HashMap<String, Tensor>,
}

impl OptimizerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot the hyper-parameters of a Candle AdamW optimizer
    pub fn from_adamw(params: &ParamsAdamW) -> Self {
        let scalars = BTreeMap::from([
            ("lr".to_string(), params.lr),
            ("beta1".to_string(), params.beta1),
            ("beta2".to_string(), params.beta2),
            ("eps".to_string(), params.eps),
            ("weight_decay".to_string(), params.weight_decay),
        ]);
        Self {
            scalars,
            tensors: HashMap::new(),
        }
    }

    /// Restore AdamW hyper-parameters, failing if any is missing
    pub fn to_adamw(&self) -> crate::Result<ParamsAdamW> {
        let get = |name: &str| {
            self.scalars.get(name).copied().ok_or_else(|| {
                LmError::CorruptRecord(format!("optimizer state has no '{}'", name))
            })
        };
        Ok(ParamsAdamW {
            lr: get("lr")?,
            beta1: get("beta1")?,
            beta2: get("beta2")?,
            eps: get("eps")?,
            weight_decay: get("weight_decay")?,
        })
    }
}

/// A model restored from a training checkpoint, with whatever progress
/// information the record carried
pub struct TrainingCheckpoint {
    pub model: LanguageModel,
    pub epoch: Option<usize>,
    pub split: Option<usize>,
    pub loss: Option<f64>,
    pub optimizer_state: Option<OptimizerState>,
}

impl TrainingCheckpoint {
    pub fn metadata(&self) -> CheckpointMetadata {
        CheckpointMetadata {
            epoch: self.epoch,
            split: self.split,
            loss: self.loss,
        }
    }
}

/// Tensors plus string header, as stored on disk
pub struct Record {
    pub tensors: HashMap<String, Tensor>,
    pub header: HashMap<String, String>,
}

impl Record {
    pub fn new(tensors: HashMap<String, Tensor>) -> Self {
        Self {
            tensors,
            header: HashMap::new(),
        }
    }

    /// Store a header value as JSON
    pub fn set_field<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) -> crate::Result<()> {
        self.header.insert(key.to_string(), serde_json::to_string(value)?);
        Ok(())
    }

    pub fn has_field(&self, key: &str) -> bool {
        self.header.contains_key(key)
    }

    /// Header value that must be present and well-formed
    pub fn required<T: DeserializeOwned>(&self, key: &str) -> crate::Result<T> {
        let raw = self
            .header
            .get(key)
            .ok_or_else(|| LmError::CorruptRecord(format!("missing field '{}'", key)))?;
        serde_json::from_str(raw)
            .map_err(|e| LmError::CorruptRecord(format!("invalid field '{}': {}", key, e)))
    }

    /// Header value that may be absent; a malformed value counts as absent
    pub fn optional<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.header.get(key)?;
        match serde_json::from_str(raw) {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!("Ignoring malformed field '{}' ({}): {}", key, raw, e);
                None
            }
        }
    }

    /// Write the record atomically
    ///
    /// Data goes to a sibling temporary file, is synced to disk, and is then
    /// renamed over `path`. The parent directory is synced after the rename.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> crate::Result<()> {
        let path = path.as_ref();
        let tmp_path = temporary_path(path)?;

        let data = self.tensors.iter().map(|(name, tensor)| (name.as_str(), tensor));
        let bytes = safetensors::serialize(data, &Some(self.header.clone())).map_err(|e| {
            LmError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
        })?;

        if let Err(e) = write_synced(&tmp_path, &bytes) {
            std::fs::remove_file(&tmp_path).ok();
            return Err(e.into());
        }

        if let Err(e) = std::fs::rename(&tmp_path, path) {
            std::fs::remove_file(&tmp_path).ok();
            return Err(e.into());
        }

        if let Some(parent) = path.parent() {
            sync_dir(parent)?;
        }

        Ok(())
    }

    /// Read a record, placing tensors on `device`
    pub fn load<P: AsRef<Path>>(path: P, device: &Device) -> crate::Result<Self> {
        let data = std::fs::read(path.as_ref())?;

        let (_, metadata) = SafeTensors::read_metadata(&data)
            .map_err(|e| LmError::CorruptRecord(format!("unreadable record: {}", e)))?;
        let header = metadata.metadata().clone().unwrap_or_default();

        let tensors = candle_core::safetensors::load_buffer(&data, device)
            .map_err(|e| LmError::CorruptRecord(format!("unreadable tensors: {}", e)))?;

        Ok(Self { tensors, header })
    }

    /// Split off the optimizer tensors, leaving the model state dict
    pub fn take_optimizer_tensors(&mut self) -> HashMap<String, Tensor> {
        let names: Vec<String> = self
            .tensors
            .keys()
            .filter(|name| name.starts_with(OPTIMIZER_PREFIX))
            .cloned()
            .collect();

        names
            .into_iter()
            .filter_map(|name| {
                let tensor = self.tensors.remove(&name)?;
                Some((name[OPTIMIZER_PREFIX.len()..].to_string(), tensor))
            })
            .collect()
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    // A bare file name has an empty parent
    let dir = if dir.as_os_str().is_empty() { Path::new(".") } else { dir };
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

fn temporary_path(path: &Path) -> crate::Result<PathBuf> {
    let file_name = path.file_name().ok_or_else(|| {
        LmError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("not a file path: {}", path.display()),
        ))
    })?;
    let mut tmp_name = std::ffi::OsString::from(".");
    tmp_name.push(file_name);
    tmp_name.push(".tmp");
    Ok(path.with_file_name(tmp_name))
}

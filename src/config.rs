use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pipeline::catalog::Subtype;
use crate::pipeline::checkpoint::CheckpointStore;

/// Application-level constants
pub const APP_NAME: &str = "MedCascade";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// JSON config file named by this variable is loaded before overrides.
pub const CONFIG_ENV: &str = "MEDCASCADE_CONFIG";
pub const MODELS_DIR_ENV: &str = "MEDCASCADE_MODELS_DIR";
pub const BIND_ENV: &str = "MEDCASCADE_BIND";

const DEFAULT_BIND: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8000);
const DEFAULT_INFERENCE_TIMEOUT_SECS: u64 = 120;
const DEFAULT_MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Log filter used when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "medcascade_lib=info,medcascade=info,tower_http=warn"
}

/// ~/MedCascade/ on all platforms. Falls back to the temp dir when no home
/// directory is known (containers without HOME).
pub fn app_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_NAME)
}

/// Default location of checkpoint files.
pub fn models_dir() -> PathBuf {
    app_data_dir().join("models")
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid value for {key}: {value}")]
    InvalidOverride { key: &'static str, value: String },

    #[error("No final checkpoint configured for {0}")]
    MissingFinalCheckpoint(Subtype),

    #[error("{0} must be greater than zero")]
    NonPositive(&'static str),
}

// ═══════════════════════════════════════════════════════════
// CascadeConfig
// ═══════════════════════════════════════════════════════════

/// Runtime configuration. Checkpoint paths are relative to `models_dir`
/// unless absolute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CascadeConfig {
    pub bind_address: SocketAddr,
    pub models_dir: PathBuf,
    pub modality_checkpoint: PathBuf,
    pub family_checkpoint: PathBuf,
    pub subtype_checkpoint: PathBuf,
    pub final_checkpoints: BTreeMap<Subtype, PathBuf>,
    pub seizure_checkpoint: Option<PathBuf>,
    /// CSV whose header uploads to the modality endpoint must match.
    pub csv_reference: Option<PathBuf>,
    pub inference_timeout_secs: u64,
    /// Keep resolved final-stage models between requests.
    pub cache_final_models: bool,
    pub max_upload_bytes: usize,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND,
            models_dir: models_dir(),
            modality_checkpoint: PathBuf::from("modality.safetensors"),
            family_checkpoint: PathBuf::from("family.safetensors"),
            subtype_checkpoint: PathBuf::from("subtype.safetensors"),
            final_checkpoints: Subtype::ALL
                .iter()
                .map(|s| (*s, PathBuf::from(s.default_checkpoint_file())))
                .collect(),
            seizure_checkpoint: None,
            csv_reference: None,
            inference_timeout_secs: DEFAULT_INFERENCE_TIMEOUT_SECS,
            cache_final_models: false,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

impl CascadeConfig {
    /// Defaults, then the JSON file from `MEDCASCADE_CONFIG`, then env overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply environment-style overrides through `lookup`.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(dir) = lookup(MODELS_DIR_ENV) {
            self.models_dir = PathBuf::from(dir);
        }
        if let Some(bind) = lookup(BIND_ENV) {
            self.bind_address = bind.parse().map_err(|_| ConfigError::InvalidOverride {
                key: BIND_ENV,
                value: bind.clone(),
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(missing) = Subtype::ALL
            .iter()
            .find(|s| !self.final_checkpoints.contains_key(s))
        {
            return Err(ConfigError::MissingFinalCheckpoint(*missing));
        }
        if self.inference_timeout_secs == 0 {
            return Err(ConfigError::NonPositive("inference_timeout_secs"));
        }
        if self.max_upload_bytes == 0 {
            return Err(ConfigError::NonPositive("max_upload_bytes"));
        }
        Ok(())
    }

    pub fn inference_timeout(&self) -> Duration {
        Duration::from_secs(self.inference_timeout_secs)
    }

    fn model_path(&self, file: &Path) -> PathBuf {
        self.models_dir.join(file)
    }

    pub fn csv_reference_path(&self) -> Option<PathBuf> {
        self.csv_reference.as_deref().map(|p| self.model_path(p))
    }

    /// Resolve every configured checkpoint against `models_dir`.
    pub fn checkpoint_store(&self) -> CheckpointStore {
        CheckpointStore::new(
            self.model_path(&self.modality_checkpoint),
            self.model_path(&self.family_checkpoint),
            self.model_path(&self.subtype_checkpoint),
            self.final_checkpoints
                .iter()
                .map(|(subtype, file)| (*subtype, self.model_path(file)))
                .collect(),
            self.seizure_checkpoint.as_deref().map(|p| self.model_path(p)),
        )
    }
}

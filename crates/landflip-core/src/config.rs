//! Pipeline settings.
//!
//! Every field has a default, so an empty TOML file (or none at all) is a
//! valid configuration. The CLI layers its flags on top of the file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Records per committed batch.
pub const DEFAULT_BATCH_SIZE: usize = 500;

pub const DEFAULT_MODEL_PATH: &str = "model.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("batch_size must be at least 1")]
    ZeroBatchSize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub batch_size: usize,
    /// Where the trained valuation model is read from and written to.
    pub model_path: PathBuf,
    /// Log headers that match no canonical field at `warn` instead of `debug`.
    pub warn_on_unmatched_columns: bool,
    /// Country applied to rows that do not name one.
    pub default_country: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            warn_on_unmatched_columns: false,
            default_country: None,
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(path: &Path, content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(path, &content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        Ok(())
    }
}

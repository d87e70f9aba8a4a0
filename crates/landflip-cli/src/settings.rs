//! Layering of config file and command-line overrides.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use landflip_core::PipelineConfig;

/// Values given on the command line (or via their environment variables).
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub config: Option<PathBuf>,
    pub model_path: Option<PathBuf>,
    pub batch_size: Option<usize>,
    pub warn_unmatched: bool,
}

/// File values first, then overrides; the result is validated.
pub fn resolve(overrides: &Overrides) -> Result<PipelineConfig> {
    let mut config = match &overrides.config {
        Some(path) => load(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(model_path) = &overrides.model_path {
        config.model_path = model_path.clone();
    }
    if let Some(batch_size) = overrides.batch_size {
        config.batch_size = batch_size;
    }
    if overrides.warn_unmatched {
        config.warn_on_unmatched_columns = true;
    }
    config.validate().context("invalid pipeline configuration")?;
    Ok(config)
}

fn load(path: &Path) -> Result<PipelineConfig> {
    PipelineConfig::from_toml_file(path)
        .with_context(|| format!("loading config from {}", path.display()))
}

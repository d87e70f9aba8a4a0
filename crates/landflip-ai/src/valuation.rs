//! Parcel valuation: a trained regression model when one is on disk,
//! otherwise a flat per-acre rate.

use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use landflip_core::Parcel;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::features::{FEATURE_NAMES, features};
use crate::gbrt::{GbrtError, GbrtParams, GradientBoostedRegressor};

/// Dollars per acre used when no model is available, and as the training
/// label for parcels without a stored valuation.
pub const HEURISTIC_RATE: f64 = 2500.0;

const ARTIFACT_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum ValuationError {
    #[error("No parcels available for training")]
    NoTrainingData,

    #[error("model fit failed: {0}")]
    Model(#[from] GbrtError),

    #[error("model artifact I/O: {0}")]
    Io(#[from] io::Error),

    #[error("model artifact encoding: {0}")]
    Encode(#[from] serde_json::Error),
}

impl ValuationError {
    /// HTTP-style status: 400 when there was nothing to train on.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NoTrainingData => 400,
            _ => 500,
        }
    }
}

/// On-disk model file.
#[derive(Debug, Serialize, Deserialize)]
struct ModelFile {
    version: u32,
    feature_names: Vec<String>,
    samples: usize,
    trained_at: DateTime<Utc>,
    model: GradientBoostedRegressor,
}

/// What a training run produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelArtifact {
    pub path: PathBuf,
    pub trained_at: DateTime<Utc>,
    pub samples: usize,
}

/// Estimates parcel value from a loaded model, or the per-acre heuristic.
#[derive(Debug, Clone, Default)]
pub struct Valuer {
    model: Option<GradientBoostedRegressor>,
}

impl Valuer {
    /// Heuristic-only valuer.
    pub fn heuristic() -> Self {
        Self::default()
    }

    /// Load the model at `path`. A missing file means heuristic valuation;
    /// an unreadable or incompatible one is logged and treated the same way.
    pub fn load(path: &Path) -> Self {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no model, using heuristic valuation");
                return Self::heuristic();
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "model unreadable, using heuristic valuation");
                return Self::heuristic();
            }
        };
        match serde_json::from_str::<ModelFile>(&text) {
            Ok(file) if file.version == ARTIFACT_VERSION && file.model.n_features() == FEATURE_NAMES.len() => {
                info!(path = %path.display(), samples = file.samples, trained_at = %file.trained_at, "loaded valuation model");
                Self { model: Some(file.model) }
            }
            Ok(file) => {
                warn!(
                    path = %path.display(),
                    version = file.version,
                    features = file.model.n_features(),
                    "model incompatible, using heuristic valuation"
                );
                Self::heuristic()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "model corrupt, using heuristic valuation");
                Self::heuristic()
            }
        }
    }

    pub fn is_trained(&self) -> bool {
        self.model.is_some()
    }

    /// Estimated value in dollars, never negative.
    pub fn estimate(&self, parcel: &Parcel) -> f64 {
        let heuristic = || parcel.acreage.filter(|a| a.is_finite()).unwrap_or(0.0) * HEURISTIC_RATE;
        let value = match &self.model {
            Some(model) => model.predict(&features(parcel)).unwrap_or_else(|e| {
                warn!(id = parcel.id, error = %e, "model prediction failed, using heuristic");
                heuristic()
            }),
            None => heuristic(),
        };
        if value.is_finite() { value.max(0.0) } else { 0.0 }
    }
}

/// Training label: the stored valuation, or the heuristic when none exists.
///
/// Parcels valued by a previous heuristic run carry `acreage × rate` as
/// their valuation, so a model trained on them learns that rate back.
pub fn training_label(parcel: &Parcel) -> f64 {
    parcel
        .valuation
        .filter(|v| v.is_finite())
        .unwrap_or_else(|| parcel.acreage.filter(|a| a.is_finite()).unwrap_or(0.0) * HEURISTIC_RATE)
}

/// Fit the valuation model on `parcels` with default parameters and write
/// it to `path`, replacing any previous model.
pub fn train(parcels: &[Parcel], path: &Path) -> Result<ModelArtifact, ValuationError> {
    train_with(parcels, path, GbrtParams::default())
}

pub fn train_with(parcels: &[Parcel], path: &Path, params: GbrtParams) -> Result<ModelArtifact, ValuationError> {
    if parcels.is_empty() {
        return Err(ValuationError::NoTrainingData);
    }
    let x: Vec<Vec<f64>> = parcels.iter().map(|p| features(p).to_vec()).collect();
    let y: Vec<f64> = parcels.iter().map(training_label).collect();
    let model = GradientBoostedRegressor::fit(&x, &y, params)?;

    let file = ModelFile {
        version: ARTIFACT_VERSION,
        feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
        samples: parcels.len(),
        trained_at: Utc::now(),
        model,
    };
    write_atomically(path, &file)?;
    info!(path = %path.display(), samples = file.samples, "trained valuation model");

    Ok(ModelArtifact {
        path: path.to_path_buf(),
        trained_at: file.trained_at,
        samples: file.samples,
    })
}

/// Write to a sibling temp file, then rename over `path`.
fn write_atomically(path: &Path, file: &ModelFile) -> Result<(), ValuationError> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;
    let tmp = tempfile::NamedTempFile::new_in(dir)?;
    {
        let mut out = BufWriter::new(tmp.as_file());
        serde_json::to_writer(&mut out, file)?;
        out.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use landflip_core::NewParcel;

    fn parcel(id: i64, acreage: Option<f64>, county: &str) -> Parcel {
        Parcel::from_new(
            id,
            NewParcel {
                acreage,
                county: Some(county.into()),
                state: Some("IA".into()),
                ..Default::default()
            },
        )
    }

    #[test]
    fn heuristic_without_model() {
        let dir = tempfile::tempdir().unwrap();
        let valuer = Valuer::load(&dir.path().join("model.json"));
        assert!(!valuer.is_trained());
        assert_eq!(valuer.estimate(&parcel(1, Some(4.0), "Polk")), 10_000.0);
        assert_eq!(valuer.estimate(&parcel(2, None, "Polk")), 0.0);
    }

    #[test]
    fn corrupt_model_falls_back_to_heuristic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        fs::write(&path, "{ not json").unwrap();
        let valuer = Valuer::load(&path);
        assert!(!valuer.is_trained());
        assert_eq!(valuer.estimate(&parcel(1, Some(2.0), "Polk")), 5_000.0);
    }

    #[test]
    fn empty_training_set_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        let err = train(&[], &path).unwrap_err();
        assert!(matches!(err, ValuationError::NoTrainingData));
        assert_eq!(err.status_code(), 400);
        assert!(!path.exists());
    }

    #[test]
    fn model_trained_on_heuristic_labels_reproduces_the_heuristic() {
        // No stored valuations: every label is acreage × rate, so the model
        // can only learn the heuristic back.
        let parcels: Vec<Parcel> = (1..=4)
            .map(|i| parcel(i, Some(i as f64), "Polk"))
            .collect();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        let artifact = train(&parcels, &path).unwrap();
        assert_eq!(artifact.samples, 4);
        assert_eq!(artifact.path, path);

        let valuer = Valuer::load(&path);
        assert!(valuer.is_trained());
        for p in &parcels {
            let heuristic = p.acreage.unwrap() * HEURISTIC_RATE;
            assert!((valuer.estimate(p) - heuristic).abs() < 1.0, "parcel {}", p.id);
        }
    }

    #[test]
    fn stored_valuations_take_precedence_as_labels() {
        let mut p = parcel(1, Some(4.0), "Polk");
        assert_eq!(training_label(&p), 10_000.0);
        p.valuation = Some(123.0);
        assert_eq!(training_label(&p), 123.0);
    }

    #[test]
    fn retraining_replaces_the_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models").join("model.json");

        let cheap = vec![parcel(1, Some(1.0), "Polk")];
        train(&cheap, &path).unwrap();
        let first = Valuer::load(&path).estimate(&cheap[0]);
        assert!((first - 2_500.0).abs() < 1e-6);

        let mut pricey = cheap.clone();
        pricey[0].valuation = Some(90_000.0);
        train(&pricey, &path).unwrap();
        let second = Valuer::load(&path).estimate(&cheap[0]);
        assert!((second - 90_000.0).abs() < 1e-6);

        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers, vec![std::ffi::OsString::from("model.json")]);
    }

    #[test]
    fn predictions_are_never_negative() {
        let mut p = parcel(1, Some(1.0), "Polk");
        p.valuation = Some(-5_000.0);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        train(&[p.clone()], &path).unwrap();
        assert_eq!(Valuer::load(&path).estimate(&p), 0.0);
    }
}

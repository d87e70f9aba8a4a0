//! Full-population operations over a store.

use std::path::Path;

use landflip_store::{ParcelStore, StoreError};
use tracing::info;

use crate::scoring::score_parcel;
use crate::valuation::{ModelArtifact, ValuationError, Valuer, train};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Valuation(#[from] ValuationError),
}

impl PipelineError {
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Store(_) => 500,
            Self::Valuation(e) => e.status_code(),
        }
    }
}

/// Score every stored parcel. Returns the number scored.
pub fn score_all<S: ParcelStore + ?Sized>(store: &mut S) -> Result<usize, PipelineError> {
    let scores: Vec<(i64, u8)> = store
        .all_parcels()?
        .iter()
        .map(|p| (p.id, score_parcel(p)))
        .collect();
    let scored = store.set_scores(&scores)?;
    info!(scored, "scored parcels");
    Ok(scored)
}

/// Value every stored parcel with `valuer`. Returns the number valued.
pub fn value_all<S: ParcelStore + ?Sized>(store: &mut S, valuer: &Valuer) -> Result<usize, PipelineError> {
    let valuations: Vec<(i64, f64)> = store
        .all_parcels()?
        .iter()
        .map(|p| (p.id, valuer.estimate(p)))
        .collect();
    let valued = store.set_valuations(&valuations)?;
    info!(valued, model = valuer.is_trained(), "valued parcels");
    Ok(valued)
}

/// Train on every stored parcel and write the model to `path`.
pub fn train_from_store<S: ParcelStore + ?Sized>(
    store: &S,
    path: &Path,
) -> Result<ModelArtifact, PipelineError> {
    let parcels = store.all_parcels()?;
    Ok(train(&parcels, path)?)
}

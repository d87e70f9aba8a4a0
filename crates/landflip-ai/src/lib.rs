//! Lead scoring and valuation for stored parcels.
//!
//! [`scoring`] is a pure heuristic. [`valuation`] estimates value from a
//! gradient-boosted model ([`gbrt`]) when one has been trained, otherwise
//! from a flat per-acre rate. [`pipeline`] applies both across a
//! [`ParcelStore`](landflip_store::ParcelStore).

pub mod features;
pub mod gbrt;
pub mod pipeline;
pub mod scoring;
pub mod valuation;

pub use features::{FEATURE_NAMES, features, locality_hash};
pub use gbrt::{GbrtError, GbrtParams, GradientBoostedRegressor};
pub use pipeline::{PipelineError, score_all, train_from_store, value_all};
pub use scoring::{heuristic_score, score_parcel};
pub use valuation::{HEURISTIC_RATE, ModelArtifact, ValuationError, Valuer, train, train_with};

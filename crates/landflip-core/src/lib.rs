//! Core types for landflip: canonical parcel records, column reconciliation,
//! geometry normalisation, the Arrow parcel schema, and pipeline settings.

pub mod config;
pub mod geometry;
pub mod parcel;
pub mod reconcile;
pub mod schema;

pub use config::{ConfigError, PipelineConfig};
pub use geometry::{Crs, GeometryError, RawGeometry, normalize, to_wkt};
pub use parcel::{NewParcel, Parcel, ParcelStatus};
pub use reconcile::{CanonicalField, CellValue, HeaderMap, RawRow, resolve};
pub use schema::{SchemaError, parcel_schema, parcels_from_batches, parcels_to_batch};

use landflip_core::SchemaError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no parcel with id {0}")]
    UnknownId(i64),

    #[error("no results for query")]
    NoResults,

    #[cfg(feature = "duckdb")]
    #[error("duckdb error: {0}")]
    DuckDb(#[from] ::duckdb::Error),

    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("{0}")]
    Other(String),
}

/// A batched write that stopped part way. `persisted` records from earlier
/// batches are committed and stay in the store.
#[derive(Debug, Error)]
#[error("storage failure after {persisted} records were committed: {source}")]
pub struct WriteError {
    pub persisted: usize,
    #[source]
    pub source: StoreError,
}

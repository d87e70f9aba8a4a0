use landflip_store::{StoreError, WriteError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    /// The file extension does not match the requested reader.
    #[error("{0}")]
    UnsupportedFormat(String),

    /// The file could not be read as its declared format.
    #[error("{0}")]
    ParseFailure(String),

    #[error("No geometry layer found: the archive has no .shp layer or GeoJSON feature collection")]
    NoGeometryLayerFound,

    #[error("storage failure after {persisted} records were committed: {source}")]
    Storage {
        persisted: usize,
        #[source]
        source: StoreError,
    },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl IngestError {
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::ParseFailure(msg.into())
    }

    /// Whether the caller sent something unusable, as opposed to a
    /// failure on our side.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedFormat(_) | Self::ParseFailure(_) | Self::NoGeometryLayerFound
        )
    }

    /// HTTP-style status for the error.
    pub fn status_code(&self) -> u16 {
        if self.is_client_error() { 400 } else { 500 }
    }

    /// Records committed before the failure, when known.
    pub fn persisted(&self) -> Option<usize> {
        match self {
            Self::Storage { persisted, .. } => Some(*persisted),
            _ => None,
        }
    }
}

impl From<WriteError> for IngestError {
    fn from(e: WriteError) -> Self {
        Self::Storage {
            persisted: e.persisted,
            source: e.source,
        }
    }
}

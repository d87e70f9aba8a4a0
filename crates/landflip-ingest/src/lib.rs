//! Upload ingestion: bytes + filename in, canonical parcels out, persisted
//! through a [`BatchWriter`].
//!
//! Each supported format is a [`FormatReader`] that turns the upload into a
//! lazy stream of [`NewParcel`]s. Readers share one column reconciler and one
//! geometry normaliser, so the same header means the same field everywhere.

pub mod canonical;
pub mod delimited;
mod error;
pub mod packaged;
pub mod spreadsheet;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

pub use delimited::DelimitedReader;
pub use error::IngestError;
pub use packaged::PackagedReader;
pub use spreadsheet::SpreadsheetReader;

use landflip_core::{NewParcel, PipelineConfig};
use landflip_store::{BatchWriter, ParcelStore};
use tracing::{debug, info, warn};

/// Lazy, single-pass stream of parcels from one upload.
pub type ParcelRows<'a> = Box<dyn Iterator<Item = Result<NewParcel, IngestError>> + 'a>;

/// One upload format.
pub trait FormatReader {
    /// Human-readable format name used in error messages.
    fn name(&self) -> &'static str;

    /// Accepted filename extensions, lower-case, without the dot.
    fn extensions(&self) -> &'static [&'static str];

    fn accepts(&self, filename: &str) -> bool {
        extension(filename).is_some_and(|ext| self.extensions().contains(&ext.as_str()))
    }

    /// Start reading `bytes`. File-level problems found up front are returned
    /// here; problems found later surface as an `Err` item in the stream.
    fn read<'a>(
        &self,
        bytes: &'a [u8],
        config: &'a PipelineConfig,
    ) -> Result<ParcelRows<'a>, IngestError>;
}

/// The upload formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Delimited,
    Spreadsheet,
    Packaged,
}

impl Format {
    pub const ALL: [Format; 3] = [Self::Delimited, Self::Spreadsheet, Self::Packaged];

    pub fn reader(&self) -> &'static dyn FormatReader {
        match self {
            Self::Delimited => &DelimitedReader,
            Self::Spreadsheet => &SpreadsheetReader,
            Self::Packaged => &PackagedReader,
        }
    }

    /// Format implied by a filename's extension.
    pub fn from_filename(filename: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.reader().accepts(filename))
    }
}

impl FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" | "txt" | "delimited" => Ok(Self::Delimited),
            "xlsx" | "xls" | "excel" | "spreadsheet" => Ok(Self::Spreadsheet),
            "shapefile" | "shp" | "zip" => Ok(Self::Packaged),
            other => Err(format!("unknown format {other:?} (expected csv, xlsx or shapefile)")),
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Delimited => "csv",
            Self::Spreadsheet => "xlsx",
            Self::Packaged => "shapefile",
        })
    }
}

/// Result of one upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestSummary {
    pub ingested: usize,
    pub flushes: usize,
    /// Rows persisted without any identifying field.
    pub anonymous: usize,
}

fn extension(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
}

/// The format for `filename`: `forced` when given, as long as the filename
/// carries one of its extensions, otherwise the one the extension implies.
pub fn resolve_format(filename: &str, forced: Option<Format>) -> Result<Format, IngestError> {
    match forced {
        Some(format) if format.reader().accepts(filename) => Ok(format),
        Some(format) => {
            let reader = format.reader();
            let expected: Vec<String> = reader.extensions().iter().map(|e| format!(".{e}")).collect();
            Err(IngestError::UnsupportedFormat(format!(
                "Unsupported file type: {filename} ({} expects {})",
                reader.name(),
                expected.join(", ")
            )))
        }
        None => Format::from_filename(filename).ok_or_else(|| {
            IngestError::UnsupportedFormat(format!(
                "Unsupported file type: {filename} (expected .csv, .txt, .xlsx, .xls or .zip)"
            ))
        }),
    }
}

/// Ingest an upload, choosing the reader from the filename's extension.
pub fn ingest<S: ParcelStore + ?Sized>(
    store: &mut S,
    filename: &str,
    bytes: &[u8],
    config: &PipelineConfig,
) -> Result<IngestSummary, IngestError> {
    let format = resolve_format(filename, None)?;
    ingest_with(format.reader(), store, filename, bytes, config)
}

/// Ingest an upload with an explicit format. The filename must still carry
/// one of that format's extensions.
pub fn ingest_as<S: ParcelStore + ?Sized>(
    format: Format,
    store: &mut S,
    filename: &str,
    bytes: &[u8],
    config: &PipelineConfig,
) -> Result<IngestSummary, IngestError> {
    let format = resolve_format(filename, Some(format))?;
    ingest_with(format.reader(), store, filename, bytes, config)
}

pub fn ingest_with<S: ParcelStore + ?Sized>(
    reader: &dyn FormatReader,
    store: &mut S,
    filename: &str,
    bytes: &[u8],
    config: &PipelineConfig,
) -> Result<IngestSummary, IngestError> {
    if !reader.accepts(filename) {
        return Err(IngestError::UnsupportedFormat(format!(
            "Unsupported file type: {filename} (not a {} file)",
            reader.name()
        )));
    }
    let rows = reader.read(bytes, config)?;
    let mut writer = BatchWriter::new(store, config.batch_size);
    let mut anonymous = 0;
    for row in rows {
        match row {
            Ok(parcel) => {
                if parcel.is_anonymous() {
                    anonymous += 1;
                }
                writer.push(parcel)?;
            }
            Err(e) => {
                warn!(filename, persisted = writer.persisted(), error = %e, "upload aborted");
                return Err(e);
            }
        }
    }
    let summary = writer.finish()?;
    if anonymous > 0 {
        debug!(filename, anonymous, "rows without an identifying field");
    }
    info!(filename, ingested = summary.written, flushes = summary.flushes, "ingested upload");
    Ok(IngestSummary {
        ingested: summary.written,
        flushes: summary.flushes,
        anonymous,
    })
}

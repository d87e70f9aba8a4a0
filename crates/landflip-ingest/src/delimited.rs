//! Comma-delimited text reader.

use std::io::Cursor;

use csv::{ReaderBuilder, StringRecord};
use landflip_core::{CellValue, HeaderMap, PipelineConfig, RawRow};

use crate::canonical::{GeometrySource, canonicalize, report_unmatched};
use crate::{FormatReader, IngestError, ParcelRows};

/// `.csv` / `.txt`: header row first, rows may be short or long.
pub struct DelimitedReader;

impl FormatReader for DelimitedReader {
    fn name(&self) -> &'static str {
        "CSV"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["csv", "txt"]
    }

    fn read<'a>(
        &self,
        bytes: &'a [u8],
        config: &'a PipelineConfig,
    ) -> Result<ParcelRows<'a>, IngestError> {
        let text = String::from_utf8_lossy(bytes);
        let text = text.strip_prefix('\u{feff}').unwrap_or(&text).to_string();

        let mut reader = ReaderBuilder::new()
            .flexible(true)
            .from_reader(Cursor::new(text.into_bytes()));
        let header = HeaderMap::new(
            reader
                .headers()
                .map_err(|e| IngestError::parse(format!("Failed to read CSV header: {e}")))?
                .iter(),
        );
        report_unmatched(&header, "csv", config);

        Ok(Box::new(reader.into_records().map(move |record| -> Result<_, IngestError> {
            let record = record.map_err(|e| IngestError::parse(format!("Failed to read CSV: {e}")))?;
            let row = RawRow::new(&header, cells(&record));
            Ok(canonicalize(&row, GeometrySource::Column, config))
        })))
    }
}

fn cells(record: &StringRecord) -> Vec<CellValue> {
    record
        .iter()
        .map(|field| CellValue::Text(field.to_string()))
        .collect()
}

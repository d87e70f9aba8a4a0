//! Workbook reader over the first worksheet.

use std::io::Cursor;

use calamine::{Data, Range, Reader, open_workbook_auto_from_rs};
use landflip_core::{CellValue, HeaderMap, NewParcel, PipelineConfig, RawRow};
use tracing::debug;

use crate::canonical::{GeometrySource, canonicalize, report_unmatched};
use crate::{FormatReader, IngestError, ParcelRows};

/// `.xlsx` / `.xls`, plus the other formats the workbook engine opens.
pub struct SpreadsheetReader;

impl FormatReader for SpreadsheetReader {
    fn name(&self) -> &'static str {
        "XLSX/XLS"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["xlsx", "xls", "xlsm", "xlsb", "ods"]
    }

    fn read<'a>(
        &self,
        bytes: &'a [u8],
        config: &'a PipelineConfig,
    ) -> Result<ParcelRows<'a>, IngestError> {
        let failed = |e: &dyn std::fmt::Display| {
            IngestError::parse(format!("Failed to read spreadsheet: {e}"))
        };
        let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
            .map_err(|e| failed(&e))?;
        let range = workbook
            .worksheet_range_at(0)
            .ok_or_else(|| failed(&"workbook has no worksheets"))?
            .map_err(|e| failed(&e))?;

        let Some(header_row) = (0..range.height()).find(|&r| !row_is_blank(&range, r)) else {
            debug!("worksheet is empty");
            return Ok(Box::new(std::iter::empty()));
        };
        let header = HeaderMap::new(
            row_cells(&range, header_row)
                .iter()
                .map(|c| c.as_text().unwrap_or_default()),
        );
        report_unmatched(&header, "spreadsheet", config);

        Ok(Box::new(SheetRows {
            range,
            next: header_row + 1,
            header,
            config,
        }))
    }
}

/// Data rows below the header, skipping fully blank rows.
struct SheetRows<'a> {
    range: Range<Data>,
    next: usize,
    header: HeaderMap,
    config: &'a PipelineConfig,
}

impl Iterator for SheetRows<'_> {
    type Item = Result<NewParcel, IngestError>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.next < self.range.height() {
            let r = self.next;
            self.next += 1;
            if row_is_blank(&self.range, r) {
                continue;
            }
            let row = RawRow::new(&self.header, row_cells(&self.range, r));
            return Some(Ok(canonicalize(&row, GeometrySource::Column, self.config)));
        }
        None
    }
}

fn row_cells(range: &Range<Data>, row: usize) -> Vec<CellValue> {
    (0..range.width())
        .map(|col| range.get((row, col)).map_or(CellValue::Empty, cell_value))
        .collect()
}

/// No cell holds anything at all. Sentinel text such as `N/A` still makes
/// a row, as it does in delimited files.
fn row_is_blank(range: &Range<Data>, row: usize) -> bool {
    row_cells(range, row)
        .iter()
        .all(|c| matches!(c, CellValue::Empty))
}

fn cell_value(data: &Data) -> CellValue {
    match data {
        Data::String(s) => CellValue::Text(s.clone()),
        Data::Float(f) => CellValue::Number(*f),
        Data::Int(i) => CellValue::Number(*i as f64),
        Data::Bool(b) => CellValue::Bool(*b),
        Data::Empty | Data::Error(_) => CellValue::Empty,
        other => CellValue::Text(other.to_string()),
    }
}

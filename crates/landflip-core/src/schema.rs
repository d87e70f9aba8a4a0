//! Arrow schema for the `parcels` table and conversion to/from [`Parcel`].
//!
//! Stores hand back query results as `RecordBatch`es; the CLI pretty-prints
//! them and the valuation trainer reads them back into records. Geometry
//! travels as WKT in `geom_wkt`.

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Float64Array, Int32Array, Int64Array, StringArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use thiserror::Error;

use crate::geometry::{RawGeometry, normalize, to_wkt};
use crate::parcel::{Parcel, ParcelStatus};

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("missing column: {0}")]
    MissingColumn(&'static str),

    #[error("null value in non-null column {column} at row {row}")]
    UnexpectedNull { column: &'static str, row: usize },

    #[error("column {column} has unsupported type {found}")]
    ColumnType { column: &'static str, found: DataType },

    #[error("unknown parcel status: {0:?}")]
    UnknownStatus(String),

    #[error("score out of range: {0}")]
    ScoreOutOfRange(i32),

    #[error("arrow error: {0}")]
    Arrow(#[from] ArrowError),
}

/// Schema of the `parcels` table.
pub fn parcel_schema() -> Schema {
    Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("parcel_id", DataType::Utf8, true),
        Field::new("apn", DataType::Utf8, true),
        Field::new("owner_name", DataType::Utf8, true),
        Field::new("county", DataType::Utf8, true),
        Field::new("state", DataType::Utf8, true),
        Field::new("country", DataType::Utf8, true),
        Field::new("acreage", DataType::Float64, true),
        Field::new("address", DataType::Utf8, true),
        Field::new("status", DataType::Utf8, false),
        Field::new("score", DataType::Int32, true),
        Field::new("valuation", DataType::Float64, true),
        Field::new("geom_wkt", DataType::Utf8, true),
    ])
}

pub fn parcel_schema_ref() -> SchemaRef {
    Arc::new(parcel_schema())
}

/// Build one `RecordBatch` from parcels, in the given order.
pub fn parcels_to_batch(parcels: &[Parcel]) -> Result<RecordBatch, SchemaError> {
    fn strings<'a>(
        parcels: &'a [Parcel],
        f: impl Fn(&'a Parcel) -> Option<&'a str>,
    ) -> ArrayRef {
        Arc::new(parcels.iter().map(f).collect::<StringArray>())
    }

    let columns: Vec<ArrayRef> = vec![
        Arc::new(Int64Array::from_iter_values(parcels.iter().map(|p| p.id))),
        strings(parcels, |p| p.parcel_id.as_deref()),
        strings(parcels, |p| p.apn.as_deref()),
        strings(parcels, |p| p.owner_name.as_deref()),
        strings(parcels, |p| p.county.as_deref()),
        strings(parcels, |p| p.state.as_deref()),
        strings(parcels, |p| p.country.as_deref()),
        Arc::new(parcels.iter().map(|p| p.acreage).collect::<Float64Array>()),
        strings(parcels, |p| p.address.as_deref()),
        strings(parcels, |p| Some(p.status.as_str())),
        Arc::new(
            parcels
                .iter()
                .map(|p| p.score.map(i32::from))
                .collect::<Int32Array>(),
        ),
        Arc::new(parcels.iter().map(|p| p.valuation).collect::<Float64Array>()),
        Arc::new(
            parcels
                .iter()
                .map(|p| p.geometry.as_ref().map(to_wkt))
                .collect::<StringArray>(),
        ),
    ];
    Ok(RecordBatch::try_new(parcel_schema_ref(), columns)?)
}

/// Read parcels back out of query results.
///
/// Columns are located by name and cast to the expected type, so batches
/// from DuckDB (`VARCHAR`, `INTEGER`, `DOUBLE`) and from [`parcels_to_batch`]
/// read the same way. Unparsable `geom_wkt` values become `None`.
pub fn parcels_from_batches(batches: &[RecordBatch]) -> Result<Vec<Parcel>, SchemaError> {
    let mut out = Vec::with_capacity(batches.iter().map(|b| b.num_rows()).sum());
    for batch in batches {
        if batch.num_rows() == 0 {
            continue;
        }
        let id = column::<Int64Array>(batch, "id", &DataType::Int64)?;
        let parcel_id = column::<StringArray>(batch, "parcel_id", &DataType::Utf8)?;
        let apn = column::<StringArray>(batch, "apn", &DataType::Utf8)?;
        let owner_name = column::<StringArray>(batch, "owner_name", &DataType::Utf8)?;
        let county = column::<StringArray>(batch, "county", &DataType::Utf8)?;
        let state = column::<StringArray>(batch, "state", &DataType::Utf8)?;
        let country = column::<StringArray>(batch, "country", &DataType::Utf8)?;
        let acreage = column::<Float64Array>(batch, "acreage", &DataType::Float64)?;
        let address = column::<StringArray>(batch, "address", &DataType::Utf8)?;
        let status_col = column::<StringArray>(batch, "status", &DataType::Utf8)?;
        let score_col = column::<Int32Array>(batch, "score", &DataType::Int32)?;
        let valuation = column::<Float64Array>(batch, "valuation", &DataType::Float64)?;
        let geom = column::<StringArray>(batch, "geom_wkt", &DataType::Utf8)?;

        for row in 0..batch.num_rows() {
            if id.is_null(row) {
                return Err(SchemaError::UnexpectedNull { column: "id", row });
            }
            let status = match get_string(&status_col, row) {
                Some(s) => ParcelStatus::parse(&s).ok_or(SchemaError::UnknownStatus(s))?,
                None => ParcelStatus::default(),
            };
            let score = match get_i32(&score_col, row) {
                Some(s) => Some(u8::try_from(s).map_err(|_| SchemaError::ScoreOutOfRange(s))?),
                None => None,
            };
            out.push(Parcel {
                id: id.value(row),
                parcel_id: get_string(&parcel_id, row),
                apn: get_string(&apn, row),
                owner_name: get_string(&owner_name, row),
                county: get_string(&county, row),
                state: get_string(&state, row),
                country: get_string(&country, row),
                acreage: get_f64(&acreage, row),
                address: get_string(&address, row),
                status,
                score,
                valuation: get_f64(&valuation, row),
                geometry: get_string(&geom, row)
                    .and_then(|wkt| normalize(RawGeometry::Wkt(&wkt), None)),
            });
        }
    }
    Ok(out)
}

// ── Column helpers ──

/// Column `name` cast to `target` and downcast to its concrete array type.
fn column<A: Array + Clone + 'static>(
    batch: &RecordBatch,
    name: &'static str,
    target: &DataType,
) -> Result<A, SchemaError> {
    let col = batch
        .column_by_name(name)
        .ok_or(SchemaError::MissingColumn(name))?;
    let array = cast(col, target)?;
    array
        .as_any()
        .downcast_ref::<A>()
        .cloned()
        .ok_or_else(|| SchemaError::ColumnType {
            column: name,
            found: col.data_type().clone(),
        })
}

fn get_string(arr: &StringArray, row: usize) -> Option<String> {
    (!arr.is_null(row)).then(|| arr.value(row).to_string())
}

fn get_f64(arr: &Float64Array, row: usize) -> Option<f64> {
    (!arr.is_null(row)).then(|| arr.value(row))
}

fn get_i32(arr: &Int32Array, row: usize) -> Option<i32> {
    (!arr.is_null(row)).then(|| arr.value(row))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::LargeStringArray;
    use geo_types::polygon;

    fn sample(id: i64) -> Parcel {
        Parcel {
            id,
            parcel_id: Some(format!("P-{id}")),
            apn: None,
            owner_name: Some("Jane Doe".into()),
            county: Some("Polk".into()),
            state: Some("IA".into()),
            country: None,
            acreage: Some(12.5),
            address: None,
            status: ParcelStatus::Negotiating,
            score: Some(62),
            valuation: Some(31_250.0),
            geometry: Some(polygon![
                (x: -93.0, y: 41.0),
                (x: -92.9, y: 41.0),
                (x: -92.9, y: 41.1),
                (x: -93.0, y: 41.1),
                (x: -93.0, y: 41.0),
            ]),
        }
    }

    #[test]
    fn schema_has_expected_fields() {
        let schema = parcel_schema();
        assert_eq!(schema.fields().len(), 13);
        assert!(schema.field_with_name("geom_wkt").is_ok());
        assert!(!schema.field_with_name("id").unwrap().is_nullable());
    }

    #[test]
    fn batch_round_trip_preserves_records() {
        let parcels = vec![sample(1), Parcel { score: None, geometry: None, ..sample(2) }];
        let batch = parcels_to_batch(&parcels).unwrap();
        assert_eq!(batch.num_rows(), 2);
        let back = parcels_from_batches(&[batch]).unwrap();
        assert_eq!(back, parcels);
    }

    #[test]
    fn reads_wider_column_types() {
        // DuckDB may hand back LargeUtf8 text and BIGINT scores.
        let base = parcels_to_batch(&[sample(3)]).unwrap();
        let schema = Schema::new(
            base.schema()
                .fields()
                .iter()
                .map(|f| match f.name().as_str() {
                    "owner_name" => Field::new("owner_name", DataType::LargeUtf8, true),
                    "score" => Field::new("score", DataType::Int64, true),
                    _ => f.as_ref().clone(),
                })
                .collect::<Vec<_>>(),
        );
        let columns: Vec<ArrayRef> = base
            .schema()
            .fields()
            .iter()
            .zip(base.columns())
            .map(|(f, col)| match f.name().as_str() {
                "owner_name" => Arc::new(LargeStringArray::from(vec![Some("Jane Doe")])) as ArrayRef,
                "score" => Arc::new(Int64Array::from(vec![Some(62)])) as ArrayRef,
                _ => col.clone(),
            })
            .collect();
        let batch = RecordBatch::try_new(Arc::new(schema), columns).unwrap();
        let back = parcels_from_batches(&[batch]).unwrap();
        assert_eq!(back[0].owner_name.as_deref(), Some("Jane Doe"));
        assert_eq!(back[0].score, Some(62));
    }

    #[test]
    fn missing_column_is_an_error() {
        let schema = Schema::new(vec![Field::new("id", DataType::Int64, false)]);
        let batch =
            RecordBatch::try_new(Arc::new(schema), vec![Arc::new(Int64Array::from(vec![1]))])
                .unwrap();
        let err = parcels_from_batches(&[batch]).unwrap_err();
        assert!(matches!(err, SchemaError::MissingColumn("parcel_id")));
    }

    #[test]
    fn empty_input_yields_no_parcels() {
        assert!(parcels_from_batches(&[]).unwrap().is_empty());
        let batch = parcels_to_batch(&[]).unwrap();
        assert!(parcels_from_batches(&[batch]).unwrap().is_empty());
    }
}

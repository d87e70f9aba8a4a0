//! Row → [`NewParcel`] construction shared by every reader.
//!
//! Field-level problems never fail the row: an unparsable acreage, an
//! unknown status or a broken geometry just leave that field at its default.

use geo_types::Geometry;
use landflip_core::{
    CanonicalField, Crs, HeaderMap, NewParcel, ParcelStatus, PipelineConfig, RawGeometry, RawRow,
    normalize,
};
use tracing::{debug, warn};

/// Where a row's geometry comes from.
pub enum GeometrySource<'g> {
    /// WKT or EWKT text in one of the geometry alias columns.
    Column,
    /// Feature geometry from a spatial layer, expressed in `crs`.
    Native {
        geometry: Option<Geometry<f64>>,
        crs: &'g Crs,
    },
}

pub fn canonicalize(row: &RawRow<'_>, geometry: GeometrySource<'_>, config: &PipelineConfig) -> NewParcel {
    NewParcel {
        parcel_id: CanonicalField::ParcelId.text(row),
        apn: CanonicalField::Apn.text(row),
        owner_name: CanonicalField::OwnerName.text(row),
        county: CanonicalField::County.text(row),
        state: CanonicalField::State.text(row),
        country: CanonicalField::Country
            .text(row)
            .or_else(|| config.default_country.clone()),
        acreage: acreage(row),
        address: CanonicalField::Address.text(row),
        status: status(row),
        geometry: match geometry {
            GeometrySource::Column => CanonicalField::Geometry.text(row).and_then(|wkt| {
                let polygon = normalize(RawGeometry::Wkt(&wkt), None);
                if polygon.is_none() {
                    debug!(len = wkt.len(), "geometry column unusable, stored absent");
                }
                polygon
            }),
            GeometrySource::Native { geometry, crs } => {
                geometry.and_then(|g| normalize(RawGeometry::Native(g), Some(crs)))
            }
        },
    }
}

/// Non-negative finite acreage, or `None`.
fn acreage(row: &RawRow<'_>) -> Option<f64> {
    let cell = CanonicalField::Acreage.resolve(row)?;
    match cell.as_number() {
        Some(a) if a >= 0.0 => Some(a),
        _ => {
            debug!(value = %cell, "acreage unusable, stored absent");
            None
        }
    }
}

fn status(row: &RawRow<'_>) -> ParcelStatus {
    let Some(raw) = CanonicalField::Status.text(row) else {
        return ParcelStatus::default();
    };
    ParcelStatus::parse(&raw).unwrap_or_else(|| {
        debug!(status = %raw, "unknown status, using lead");
        ParcelStatus::default()
    })
}

/// Log the headers of `source` that map to no canonical field.
pub fn report_unmatched(header: &HeaderMap, source: &str, config: &PipelineConfig) {
    let unmatched = header.unmatched();
    if unmatched.is_empty() {
        return;
    }
    let columns = unmatched.join(", ");
    if config.warn_on_unmatched_columns {
        warn!(source, columns = %columns, "columns ignored");
    } else {
        debug!(source, columns = %columns, "columns ignored");
    }
}

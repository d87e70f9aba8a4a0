//! GeoJSON export of stored parcels.

use geo_types::{LineString, Polygon};
use landflip_core::Parcel;
use serde_json::{Value, json};

use crate::{ParcelStore, StoreError};

pub const DEFAULT_GEOJSON_LIMIT: usize = 1000;
pub const MAX_GEOJSON_LIMIT: usize = 10_000;

/// The newest `limit` parcels (clamped to `1..=10000`) as a
/// `FeatureCollection`. Parcels without geometry get `"geometry": null`.
pub fn feature_collection<S: ParcelStore + ?Sized>(
    store: &S,
    limit: usize,
) -> Result<Value, StoreError> {
    // `list` caps at the listing maximum, which is lower than ours.
    let mut parcels = store.all_parcels()?;
    parcels.reverse();
    parcels.truncate(limit.clamp(1, MAX_GEOJSON_LIMIT));
    Ok(json!({
        "type": "FeatureCollection",
        "features": parcels.iter().map(feature).collect::<Vec<_>>(),
    }))
}

pub fn feature(parcel: &Parcel) -> Value {
    json!({
        "type": "Feature",
        "geometry": parcel.geometry.as_ref().map(polygon_geometry),
        "properties": {
            "id": parcel.id,
            "parcel_id": parcel.parcel_id,
            "apn": parcel.apn,
            "owner_name": parcel.owner_name,
            "county": parcel.county,
            "state": parcel.state,
            "country": parcel.country,
            "acreage": parcel.acreage,
            "address": parcel.address,
            "status": parcel.status,
            "score": parcel.score,
            "valuation": parcel.valuation,
        },
    })
}

fn polygon_geometry(polygon: &Polygon<f64>) -> Value {
    fn ring(ls: &LineString<f64>) -> Vec<[f64; 2]> {
        ls.coords().map(|c| [c.x, c.y]).collect()
    }
    let rings: Vec<_> = std::iter::once(polygon.exterior())
        .chain(polygon.interiors())
        .map(ring)
        .collect();
    json!({ "type": "Polygon", "coordinates": rings })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use geo_types::polygon;
    use landflip_core::NewParcel;

    fn store_with(n: usize) -> MemoryStore {
        let mut store = MemoryStore::new();
        let batch: Vec<_> = (0..n)
            .map(|i| NewParcel {
                parcel_id: Some(format!("P-{i}")),
                geometry: (i == 0).then(|| {
                    polygon![
                        (x: 0.0, y: 0.0),
                        (x: 1.0, y: 0.0),
                        (x: 1.0, y: 1.0),
                        (x: 0.0, y: 0.0),
                    ]
                }),
                ..Default::default()
            })
            .collect();
        store.insert_batch(&batch).unwrap();
        store
    }

    #[test]
    fn collection_is_newest_first() {
        let store = store_with(3);
        let fc = feature_collection(&store, DEFAULT_GEOJSON_LIMIT).unwrap();
        assert_eq!(fc["type"], "FeatureCollection");
        let features = fc["features"].as_array().unwrap();
        assert_eq!(features.len(), 3);
        assert_eq!(features[0]["properties"]["parcel_id"], "P-2");
        assert_eq!(features[0]["properties"]["status"], "lead");
        assert!(features[0]["geometry"].is_null());
    }

    #[test]
    fn polygon_geometry_is_emitted() {
        let store = store_with(1);
        let fc = feature_collection(&store, 10).unwrap();
        let geometry = &fc["features"][0]["geometry"];
        assert_eq!(geometry["type"], "Polygon");
        assert_eq!(geometry["coordinates"][0][1], json!([1.0, 0.0]));
        assert_eq!(geometry["coordinates"][0].as_array().unwrap().len(), 4);
    }

    #[test]
    fn limit_is_clamped() {
        let store = store_with(3);
        let fc = feature_collection(&store, 0).unwrap();
        assert_eq!(fc["features"].as_array().unwrap().len(), 1);
    }
}

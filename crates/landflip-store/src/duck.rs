//! DuckDB parcel store.
//!
//! One `parcels` table with a sequence-backed id. Geometry is persisted as
//! WKT in `geom_wkt`; reads go through Arrow record batches and
//! [`parcels_from_batches`].

use std::path::Path;

use arrow::array::Int64Array;
use arrow::record_batch::RecordBatch;
use duckdb::{Connection, params, params_from_iter};
use landflip_core::{NewParcel, Parcel, parcels_from_batches, to_wkt};
use tracing::{debug, info};

use crate::{MAX_LIST_LIMIT, ParcelFilter, ParcelStore, StoreError};

const SCHEMA_SQL: &str = "
CREATE SEQUENCE IF NOT EXISTS parcels_id_seq START 1;
CREATE TABLE IF NOT EXISTS parcels (
    id BIGINT NOT NULL DEFAULT nextval('parcels_id_seq'),
    parcel_id VARCHAR,
    apn VARCHAR,
    owner_name VARCHAR,
    county VARCHAR,
    state VARCHAR,
    country VARCHAR,
    acreage DOUBLE,
    address VARCHAR,
    status VARCHAR NOT NULL DEFAULT 'lead',
    score INTEGER,
    valuation DOUBLE,
    geom_wkt VARCHAR
);
";

const COLUMNS: &str = "id, parcel_id, apn, owner_name, county, state, country, acreage, \
                       address, status, score, valuation, geom_wkt";

/// DuckDB-backed [`ParcelStore`].
///
/// Use [`open`](Self::open) for an ephemeral in-memory database and
/// [`open_persistent`](Self::open_persistent) for a file that survives
/// restarts. The table is created on open if missing.
pub struct DuckStore {
    conn: Connection,
}

impl DuckStore {
    /// Open an in-memory DuckDB database.
    pub fn open() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    /// Open or create a persistent DuckDB database at the given path.
    pub fn open_persistent(path: &Path) -> Result<Self, StoreError> {
        let store = Self::init(Connection::open(path)?)?;
        info!(path = %path.display(), "opened parcel database");
        Ok(store)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn })
    }

    /// Execute arbitrary SQL and return Arrow RecordBatches.
    pub fn query_arrow(&self, sql: &str) -> Result<Vec<RecordBatch>, StoreError> {
        let mut stmt = self.conn.prepare(sql)?;
        let batches: Vec<RecordBatch> = stmt.query_arrow([])?.collect();
        Ok(batches)
    }

    /// Parcels matching `filter` as Arrow batches, newest first.
    pub fn list_arrow(&self, filter: &ParcelFilter) -> Result<Vec<RecordBatch>, StoreError> {
        let mut clauses = Vec::new();
        let mut values: Vec<String> = Vec::new();
        for (column, needle) in [
            ("owner_name", &filter.owner_name),
            ("county", &filter.county),
            ("state", &filter.state),
        ] {
            if let Some(needle) = needle.as_deref().map(str::trim)
                && !needle.is_empty()
            {
                clauses.push(format!("{column} ILIKE ?"));
                values.push(format!("%{needle}%"));
            }
        }
        if let Some(status) = filter.status {
            clauses.push("status = ?".to_string());
            values.push(status.as_str().to_string());
        }
        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let sql = format!(
            "SELECT {COLUMNS} FROM parcels {where_sql} ORDER BY id DESC LIMIT {}",
            filter.effective_limit(MAX_LIST_LIMIT)
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let batches: Vec<RecordBatch> = stmt.query_arrow(params_from_iter(values))?.collect();
        Ok(batches)
    }

    fn update_column<T: duckdb::ToSql + Copy>(
        &mut self,
        column: &str,
        updates: &[(i64, T)],
    ) -> Result<usize, StoreError> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(&format!("UPDATE parcels SET {column} = ? WHERE id = ?"))?;
            for &(id, value) in updates {
                if stmt.execute(params![value, id])? == 0 {
                    return Err(StoreError::UnknownId(id));
                }
            }
        }
        tx.commit()?;
        debug!(column, count = updates.len(), "updated parcels");
        Ok(updates.len())
    }
}

impl ParcelStore for DuckStore {
    fn insert_batch(&mut self, batch: &[NewParcel]) -> Result<usize, StoreError> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO parcels (parcel_id, apn, owner_name, county, state, country, \
                 acreage, address, status, geom_wkt) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )?;
            for p in batch {
                let wkt = p.geometry.as_ref().map(to_wkt);
                let status = p.status.as_str().to_string();
                stmt.execute(params![
                    p.parcel_id,
                    p.apn,
                    p.owner_name,
                    p.county,
                    p.state,
                    p.country,
                    p.acreage,
                    p.address,
                    status,
                    wkt,
                ])?;
            }
        }
        tx.commit()?;
        debug!(count = batch.len(), "committed parcel batch");
        Ok(batch.len())
    }

    fn all_parcels(&self) -> Result<Vec<Parcel>, StoreError> {
        let batches = self.query_arrow(&format!("SELECT {COLUMNS} FROM parcels ORDER BY id"))?;
        Ok(parcels_from_batches(&batches)?)
    }

    fn set_scores(&mut self, scores: &[(i64, u8)]) -> Result<usize, StoreError> {
        let scores: Vec<(i64, i32)> = scores.iter().map(|&(id, s)| (id, i32::from(s))).collect();
        self.update_column("score", &scores)
    }

    fn set_valuations(&mut self, valuations: &[(i64, f64)]) -> Result<usize, StoreError> {
        self.update_column("valuation", valuations)
    }

    fn count(&self) -> Result<usize, StoreError> {
        let mut stmt = self.conn.prepare("SELECT count(*)::BIGINT AS cnt FROM parcels")?;
        let batches: Vec<RecordBatch> = stmt.query_arrow([])?.collect();
        let batch = batches.first().ok_or(StoreError::NoResults)?;
        let col = batch
            .column(0)
            .as_any()
            .downcast_ref::<Int64Array>()
            .ok_or_else(|| StoreError::Other("count column not i64".into()))?;
        Ok(col.value(0) as usize)
    }

    fn list(&self, filter: &ParcelFilter) -> Result<Vec<Parcel>, StoreError> {
        Ok(parcels_from_batches(&self.list_arrow(filter)?)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_types::polygon;
    use landflip_core::ParcelStatus;
    use tempfile::TempDir;

    fn sample(owner: &str, county: &str) -> NewParcel {
        NewParcel {
            parcel_id: Some(format!("P-{owner}")),
            owner_name: Some(owner.into()),
            county: Some(county.into()),
            acreage: Some(12.5),
            ..Default::default()
        }
    }

    #[test]
    fn open_in_memory() {
        let store = DuckStore::open().unwrap();
        assert_eq!(store.count().unwrap(), 0);
        assert!(store.all_parcels().unwrap().is_empty());
    }

    #[test]
    fn insert_and_read_back() {
        let mut store = DuckStore::open().unwrap();
        let mut with_geom = sample("Jane Doe", "Polk");
        with_geom.geometry = Some(polygon![
            (x: -93.0, y: 41.0),
            (x: -92.9, y: 41.0),
            (x: -92.9, y: 41.1),
            (x: -93.0, y: 41.0),
        ]);
        store
            .insert_batch(&[with_geom.clone(), NewParcel::default()])
            .unwrap();

        let all = store.all_parcels().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, 1);
        assert_eq!(all[0].owner_name.as_deref(), Some("Jane Doe"));
        assert_eq!(all[0].acreage, Some(12.5));
        assert_eq!(all[0].status, ParcelStatus::Lead);
        assert_eq!(all[0].geometry, with_geom.geometry);
        assert_eq!(all[1].id, 2);
        assert!(all[1].owner_name.is_none());
    }

    #[test]
    fn scores_and_valuations_persist() {
        let mut store = DuckStore::open().unwrap();
        store
            .insert_batch(&[sample("a", "Polk"), sample("b", "Story")])
            .unwrap();
        store.set_scores(&[(1, 65), (2, 60)]).unwrap();
        store.set_valuations(&[(1, 31_250.0)]).unwrap();
        let all = store.all_parcels().unwrap();
        assert_eq!(all[0].score, Some(65));
        assert_eq!(all[1].score, Some(60));
        assert_eq!(all[0].valuation, Some(31_250.0));
        assert_eq!(all[1].valuation, None);
    }

    #[test]
    fn unknown_id_rolls_back_update() {
        let mut store = DuckStore::open().unwrap();
        store.insert_batch(&[sample("a", "Polk")]).unwrap();
        let result = store.set_scores(&[(1, 65), (42, 10)]);
        assert!(matches!(result, Err(StoreError::UnknownId(42))));
        assert_eq!(store.all_parcels().unwrap()[0].score, None);
    }

    #[test]
    fn list_filters_newest_first() {
        let mut store = DuckStore::open().unwrap();
        store
            .insert_batch(&[
                sample("Jane Doe", "Polk"),
                sample("John Doe", "Story"),
                sample("Ann Roe", "Polk"),
            ])
            .unwrap();
        let filter = ParcelFilter {
            county: Some("polk".into()),
            ..Default::default()
        };
        let listed = store.list(&filter).unwrap();
        let owners: Vec<_> = listed.iter().filter_map(|p| p.owner_name.as_deref()).collect();
        assert_eq!(owners, vec!["Ann Roe", "Jane Doe"]);

        let filter = ParcelFilter {
            owner_name: Some("DOE".into()),
            limit: 1,
            ..Default::default()
        };
        let listed = store.list(&filter).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].owner_name.as_deref(), Some("John Doe"));
    }

    #[test]
    fn persistent_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("parcels.duckdb");
        {
            let mut store = DuckStore::open_persistent(&path).unwrap();
            store.insert_batch(&[sample("a", "Polk")]).unwrap();
        }
        let mut store = DuckStore::open_persistent(&path).unwrap();
        assert_eq!(store.count().unwrap(), 1);
        store.insert_batch(&[sample("b", "Polk")]).unwrap();
        let ids: Vec<i64> = store.all_parcels().unwrap().iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }
}

//! Storage layer: the `ParcelStore` seam, an in-memory store, and a
//! DuckDB-backed store behind the `duckdb` feature.

mod error;
pub mod export;
mod memory;
mod writer;

pub use error::{StoreError, WriteError};
pub use export::{DEFAULT_GEOJSON_LIMIT, MAX_GEOJSON_LIMIT, feature_collection};
pub use memory::MemoryStore;
pub use writer::{BatchWriter, WriteSummary, write_all};

#[cfg(feature = "duckdb")]
mod duck;
#[cfg(feature = "duckdb")]
pub use duck::DuckStore;

use landflip_core::{NewParcel, Parcel, ParcelStatus};

pub const DEFAULT_LIST_LIMIT: usize = 500;
pub const MAX_LIST_LIMIT: usize = 5000;

/// A durable, queryable collection of parcels.
///
/// `insert_batch` is atomic for its batch. Full-population updates take
/// `(id, value)` pairs and commit them in a single call.
pub trait ParcelStore {
    /// Persist `batch`, returning the number of records written.
    fn insert_batch(&mut self, batch: &[NewParcel]) -> Result<usize, StoreError>;

    /// Every stored parcel, oldest first.
    fn all_parcels(&self) -> Result<Vec<Parcel>, StoreError>;

    fn set_scores(&mut self, scores: &[(i64, u8)]) -> Result<usize, StoreError>;

    fn set_valuations(&mut self, valuations: &[(i64, f64)]) -> Result<usize, StoreError>;

    fn count(&self) -> Result<usize, StoreError>;

    /// Parcels matching `filter`, newest first.
    fn list(&self, filter: &ParcelFilter) -> Result<Vec<Parcel>, StoreError>;
}

/// Listing filter. Text filters are case-insensitive substring matches;
/// `status` is exact.
#[derive(Debug, Clone, PartialEq)]
pub struct ParcelFilter {
    pub owner_name: Option<String>,
    pub county: Option<String>,
    pub state: Option<String>,
    pub status: Option<ParcelStatus>,
    pub limit: usize,
}

impl Default for ParcelFilter {
    fn default() -> Self {
        Self {
            owner_name: None,
            county: None,
            state: None,
            status: None,
            limit: DEFAULT_LIST_LIMIT,
        }
    }
}

impl ParcelFilter {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit,
            ..Default::default()
        }
    }

    /// Limit clamped into `1..=max`.
    pub fn effective_limit(&self, max: usize) -> usize {
        self.limit.clamp(1, max)
    }

    pub fn matches(&self, parcel: &Parcel) -> bool {
        fn contains(field: Option<&str>, needle: Option<&str>) -> bool {
            match needle.map(str::trim).filter(|n| !n.is_empty()) {
                None => true,
                Some(needle) => field
                    .is_some_and(|f| f.to_lowercase().contains(&needle.to_lowercase())),
            }
        }
        contains(parcel.owner_name.as_deref(), self.owner_name.as_deref())
            && contains(parcel.county.as_deref(), self.county.as_deref())
            && contains(parcel.state.as_deref(), self.state.as_deref())
            && self.status.is_none_or(|s| parcel.status == s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parcel(owner: &str, county: &str, status: ParcelStatus) -> Parcel {
        Parcel::from_new(
            1,
            NewParcel {
                owner_name: Some(owner.into()),
                county: Some(county.into()),
                status,
                ..Default::default()
            },
        )
    }

    #[test]
    fn empty_filter_matches_everything() {
        let filter = ParcelFilter::default();
        assert!(filter.matches(&parcel("Jane Doe", "Polk", ParcelStatus::Lead)));
        assert!(filter.matches(&Parcel::from_new(2, NewParcel::default())));
    }

    #[test]
    fn text_filters_are_case_insensitive_substrings() {
        let filter = ParcelFilter {
            owner_name: Some("doe".into()),
            county: Some("POL".into()),
            ..Default::default()
        };
        assert!(filter.matches(&parcel("Jane Doe", "Polk", ParcelStatus::Lead)));
        assert!(!filter.matches(&parcel("Jane Roe", "Polk", ParcelStatus::Lead)));
    }

    #[test]
    fn text_filter_excludes_missing_fields() {
        let filter = ParcelFilter {
            state: Some("IA".into()),
            ..Default::default()
        };
        assert!(!filter.matches(&parcel("Jane Doe", "Polk", ParcelStatus::Lead)));
    }

    #[test]
    fn status_filter_is_exact() {
        let filter = ParcelFilter {
            status: Some(ParcelStatus::Closed),
            ..Default::default()
        };
        assert!(filter.matches(&parcel("A", "B", ParcelStatus::Closed)));
        assert!(!filter.matches(&parcel("A", "B", ParcelStatus::Lead)));
    }

    #[test]
    fn limit_is_clamped() {
        assert_eq!(ParcelFilter::with_limit(0).effective_limit(MAX_LIST_LIMIT), 1);
        assert_eq!(ParcelFilter::with_limit(9_999).effective_limit(MAX_LIST_LIMIT), 5000);
        assert_eq!(ParcelFilter::default().effective_limit(MAX_LIST_LIMIT), 500);
    }
}

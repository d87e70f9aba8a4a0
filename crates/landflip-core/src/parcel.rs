//! Canonical parcel records.
//!
//! [`NewParcel`] is what ingestion produces from one input row; [`Parcel`] is
//! the same record once a store has assigned it an id. Score and valuation
//! only exist on persisted parcels because they are derived later.

use std::fmt;

use geo_types::Polygon;
use serde::{Deserialize, Serialize};

/// Lead lifecycle tag. Ingestion only ever creates [`ParcelStatus::Lead`]
/// unless the source row names one of the known states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParcelStatus {
    #[default]
    Lead,
    Contacted,
    Negotiating,
    ContractSent,
    UnderContract,
    Closed,
    Dead,
}

impl ParcelStatus {
    pub const ALL: [ParcelStatus; 7] = [
        Self::Lead,
        Self::Contacted,
        Self::Negotiating,
        Self::ContractSent,
        Self::UnderContract,
        Self::Closed,
        Self::Dead,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lead => "lead",
            Self::Contacted => "contacted",
            Self::Negotiating => "negotiating",
            Self::ContractSent => "contract_sent",
            Self::UnderContract => "under_contract",
            Self::Closed => "closed",
            Self::Dead => "dead",
        }
    }

    /// Parse a status tag, ignoring case, surrounding whitespace, and
    /// space/hyphen vs underscore (`"Under Contract"` → `UnderContract`).
    pub fn parse(s: &str) -> Option<Self> {
        let key: String = s
            .trim()
            .chars()
            .map(|c| match c {
                ' ' | '-' => '_',
                c => c.to_ascii_lowercase(),
            })
            .collect();
        Self::ALL.into_iter().find(|status| status.as_str() == key)
    }
}

impl fmt::Display for ParcelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parcel produced by ingestion, not yet persisted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewParcel {
    pub parcel_id: Option<String>,
    pub apn: Option<String>,
    pub owner_name: Option<String>,
    pub county: Option<String>,
    pub state: Option<String>,
    /// Two-letter country code as supplied.
    pub country: Option<String>,
    /// Raw numeric area; acres or hectares depending on jurisdiction.
    pub acreage: Option<f64>,
    pub address: Option<String>,
    pub status: ParcelStatus,
    /// Polygon in EPSG:4326.
    pub geometry: Option<Polygon<f64>>,
}

impl NewParcel {
    /// True when none of the identifying fields resolved. Such rows are
    /// still persisted.
    pub fn is_anonymous(&self) -> bool {
        self.parcel_id.is_none()
            && self.apn.is_none()
            && self.owner_name.is_none()
            && self.address.is_none()
    }
}

/// A persisted parcel.
#[derive(Debug, Clone, PartialEq)]
pub struct Parcel {
    pub id: i64,
    pub parcel_id: Option<String>,
    pub apn: Option<String>,
    pub owner_name: Option<String>,
    pub county: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub acreage: Option<f64>,
    pub address: Option<String>,
    pub status: ParcelStatus,
    /// Lead score in `0..=100`.
    pub score: Option<u8>,
    pub valuation: Option<f64>,
    pub geometry: Option<Polygon<f64>>,
}

impl Parcel {
    /// Attach a store id to a freshly ingested record.
    pub fn from_new(id: i64, new: NewParcel) -> Self {
        Self {
            id,
            parcel_id: new.parcel_id,
            apn: new.apn,
            owner_name: new.owner_name,
            county: new.county,
            state: new.state,
            country: new.country,
            acreage: new.acreage,
            address: new.address,
            status: new.status,
            score: None,
            valuation: None,
            geometry: new.geometry,
        }
    }
}

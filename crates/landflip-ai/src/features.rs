//! Valuation feature vector.

use landflip_core::Parcel;
use sha2::{Digest, Sha256};

pub const FEATURE_NAMES: [&str; 3] = ["acreage", "county_hash", "state_hash"];

/// `[acreage or 0, h(county), h(state)]`.
pub fn features(parcel: &Parcel) -> [f64; 3] {
    [
        parcel.acreage.filter(|a| a.is_finite()).unwrap_or(0.0),
        locality_hash(parcel.county.as_deref()),
        locality_hash(parcel.state.as_deref()),
    ]
}

/// Stable bucket of a place name in `[0, 1)`: the first eight bytes of
/// SHA-256 over the trimmed lower-case name, modulo 1000, over 1000.
/// Absent names hash as the empty string.
pub fn locality_hash(name: Option<&str>) -> f64 {
    let key = name.unwrap_or("").trim().to_lowercase();
    let digest = Sha256::digest(key.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) % 1000) as f64 / 1000.0
}

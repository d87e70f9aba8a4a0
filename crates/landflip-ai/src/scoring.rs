//! Heuristic lead score.

use landflip_core::Parcel;

const BASE: i32 = 50;

/// Lead score in `0..=100` from acreage, county and tax-delinquency years.
///
/// Base 50. Acreage ≥ 40 adds 20, 10..40 adds 10, anything else positive
/// adds 5. A non-blank county adds 5. Delinquency adds three points per year,
/// capped at 15. Absent, zero, negative or non-finite inputs add nothing.
pub fn heuristic_score(acreage: Option<f64>, county: Option<&str>, delinquency_years: Option<f64>) -> u8 {
    let mut score = BASE;
    score += match acreage.filter(|a| a.is_finite()) {
        Some(a) if a >= 40.0 => 20,
        Some(a) if a >= 10.0 => 10,
        Some(a) if a > 0.0 => 5,
        _ => 0,
    };
    if county.is_some_and(|c| !c.trim().is_empty()) {
        score += 5;
    }
    if let Some(d) = delinquency_years.filter(|d| d.is_finite() && *d > 0.0) {
        score += ((d * 3.0).floor() as i32).min(15);
    }
    score.clamp(0, 100) as u8
}

/// Score a stored parcel. No delinquency data is stored, so that term is
/// always absent here.
pub fn score_parcel(parcel: &Parcel) -> u8 {
    heuristic_score(parcel.acreage, parcel.county.as_deref(), None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_example_scores_65() {
        assert_eq!(heuristic_score(Some(12.5), Some("Polk"), None), 65);
    }

    #[test]
    fn acreage_bands() {
        assert_eq!(heuristic_score(None, None, None), 50);
        assert_eq!(heuristic_score(Some(0.0), None, None), 50);
        assert_eq!(heuristic_score(Some(-5.0), None, None), 50);
        assert_eq!(heuristic_score(Some(0.5), None, None), 55);
        assert_eq!(heuristic_score(Some(10.0), None, None), 60);
        assert_eq!(heuristic_score(Some(39.99), None, None), 60);
        assert_eq!(heuristic_score(Some(40.0), None, None), 70);
        assert_eq!(heuristic_score(Some(f64::NAN), None, None), 50);
    }

    #[test]
    fn blank_county_adds_nothing() {
        assert_eq!(heuristic_score(None, Some("   "), None), 50);
        assert_eq!(heuristic_score(None, Some("Story"), None), 55);
    }

    #[test]
    fn delinquency_is_capped() {
        assert_eq!(heuristic_score(None, None, Some(1.0)), 53);
        assert_eq!(heuristic_score(None, None, Some(1.9)), 55);
        assert_eq!(heuristic_score(None, None, Some(10.0)), 65);
        assert_eq!(heuristic_score(None, None, Some(-2.0)), 50);
        assert_eq!(heuristic_score(Some(100.0), Some("Polk"), Some(50.0)), 90);
    }

    #[test]
    fn always_in_range_and_monotonic_in_acreage() {
        let acreages = [
            None,
            Some(-1.0),
            Some(0.0),
            Some(0.001),
            Some(9.999),
            Some(10.0),
            Some(39.999),
            Some(40.0),
            Some(1e12),
        ];
        for county in [None, Some(""), Some("Polk")] {
            for delinquency in [None, Some(0.0), Some(2.5), Some(1e9)] {
                let mut previous = 0;
                for acreage in acreages {
                    let s = heuristic_score(acreage, county, delinquency);
                    assert!(s <= 100);
                    if acreage.is_some_and(|a| a >= 0.0) {
                        assert!(s >= previous, "score dropped at acreage {acreage:?}");
                        previous = s;
                    }
                }
            }
        }
    }

    #[test]
    fn parcel_score_ignores_delinquency() {
        let parcel = Parcel::from_new(
            1,
            landflip_core::NewParcel {
                acreage: Some(45.0),
                county: Some("Polk".into()),
                ..Default::default()
            },
        );
        assert_eq!(score_parcel(&parcel), 75);
    }
}

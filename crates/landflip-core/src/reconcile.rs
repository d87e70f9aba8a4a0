//! Column reconciliation: map source headers onto canonical parcel fields.
//!
//! Every reader turns its native row into a [`RawRow`] of [`CellValue`]s
//! behind a [`HeaderMap`], then asks [`resolve`] for each canonical field.
//! Header matching is case-insensitive and whitespace-trimmed, and the alias
//! table lives here so a `County` column means the same thing in a CSV, a
//! workbook, and a shapefile.

use std::collections::HashMap;
use std::fmt;

/// Canonical parcel fields that can be populated from a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CanonicalField {
    ParcelId,
    Apn,
    OwnerName,
    County,
    State,
    Country,
    Acreage,
    Address,
    Status,
    /// WKT geometry column.
    Geometry,
}

impl CanonicalField {
    pub const ALL: [CanonicalField; 10] = [
        Self::ParcelId,
        Self::Apn,
        Self::OwnerName,
        Self::County,
        Self::State,
        Self::Country,
        Self::Acreage,
        Self::Address,
        Self::Status,
        Self::Geometry,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::ParcelId => "parcel_id",
            Self::Apn => "apn",
            Self::OwnerName => "owner_name",
            Self::County => "county",
            Self::State => "state",
            Self::Country => "country",
            Self::Acreage => "acreage",
            Self::Address => "address",
            Self::Status => "status",
            Self::Geometry => "geometry",
        }
    }

    /// Source column names for this field, highest priority first.
    /// Already in header-key form (lower-case, trimmed).
    pub fn aliases(&self) -> &'static [&'static str] {
        match self {
            Self::ParcelId => &["parcel_id", "parcelid", "parcel"],
            Self::Apn => &["apn"],
            Self::OwnerName => &["owner", "owner_name"],
            Self::County => &["county"],
            Self::State => &["state"],
            Self::Country => &["country"],
            Self::Acreage => &["acreage", "acres", "size_acres"],
            Self::Address => &["address"],
            Self::Status => &["status"],
            Self::Geometry => &["geom_wkt", "wkt", "geometry"],
        }
    }

    /// Resolve this field from a row using the shared alias table.
    pub fn resolve<'r>(&self, row: &'r RawRow<'_>) -> Option<&'r CellValue> {
        resolve(row, self.aliases())
    }

    /// Resolve this field as trimmed text.
    pub fn text(&self, row: &RawRow<'_>) -> Option<String> {
        self.resolve(row).and_then(CellValue::as_text)
    }
}

/// One cell, reduced to the value kinds the parcel schema cares about.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Text(String),
    Number(f64),
    Bool(bool),
    Empty,
}

/// Text cell contents treated as "no value", compared case-insensitively.
const MISSING_MARKERS: &[&str] = &["null", "none", "nan", "n/a", "#n/a"];

impl CellValue {
    /// Missing-value sentinel: empty cells, blank or null-marker text, NaN.
    pub fn is_missing(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Number(n) => n.is_nan(),
            Self::Bool(_) => false,
            Self::Text(s) => {
                let s = s.trim();
                s.is_empty() || MISSING_MARKERS.iter().any(|m| s.eq_ignore_ascii_case(m))
            }
        }
    }

    /// Render as trimmed text. Integral numbers drop their fractional part,
    /// so a spreadsheet id of `12345.0` becomes `"12345"`.
    pub fn as_text(&self) -> Option<String> {
        if self.is_missing() {
            return None;
        }
        match self {
            Self::Text(s) => Some(s.trim().to_string()),
            Self::Number(n) => Some(format_number(*n)),
            Self::Bool(b) => Some(b.to_string()),
            Self::Empty => None,
        }
    }

    /// Coerce to a finite number. Unparsable text yields `None`.
    pub fn as_number(&self) -> Option<f64> {
        let n = match self {
            Self::Number(n) => *n,
            Self::Text(s) => s.trim().parse::<f64>().ok()?,
            Self::Bool(_) | Self::Empty => return None,
        };
        n.is_finite().then_some(n)
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Number(n) => f.write_str(&format_number(*n)),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Empty => Ok(()),
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// Header key form: trimmed and lower-cased.
pub fn header_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Positions of a source's columns, keyed by normalised header name.
///
/// When two headers normalise to the same key the first one wins.
#[derive(Debug, Clone, Default)]
pub struct HeaderMap {
    headers: Vec<String>,
    positions: HashMap<String, usize>,
}

impl HeaderMap {
    pub fn new<I, S>(headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let headers: Vec<String> = headers.into_iter().map(|h| h.as_ref().to_string()).collect();
        let mut positions = HashMap::with_capacity(headers.len());
        for (i, header) in headers.iter().enumerate() {
            positions.entry(header_key(header)).or_insert(i);
        }
        Self { headers, positions }
    }

    pub fn position(&self, alias: &str) -> Option<usize> {
        self.positions.get(&header_key(alias)).copied()
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Headers that match no alias of any canonical field.
    pub fn unmatched(&self) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|h| {
                let key = header_key(h);
                !key.is_empty()
                    && !CanonicalField::ALL
                        .iter()
                        .any(|f| f.aliases().contains(&key.as_str()))
            })
            .map(String::as_str)
            .collect()
    }
}

/// One source row: cells in header order.
#[derive(Debug, Clone)]
pub struct RawRow<'h> {
    header: &'h HeaderMap,
    cells: Vec<CellValue>,
}

impl<'h> RawRow<'h> {
    pub fn new(header: &'h HeaderMap, cells: Vec<CellValue>) -> Self {
        Self { header, cells }
    }

    /// Cell under a header name. Short rows read as [`CellValue::Empty`].
    pub fn get(&self, name: &str) -> Option<&CellValue> {
        const EMPTY: &CellValue = &CellValue::Empty;
        self.header
            .position(name)
            .map(|i| self.cells.get(i).unwrap_or(EMPTY))
    }

    pub fn header(&self) -> &HeaderMap {
        self.header
    }
}

/// Resolve a field from `row` by trying `aliases` in priority order.
///
/// An alias is skipped when its column is absent or holds a missing-value
/// sentinel; the first alias with a real value wins.
pub fn resolve<'r>(row: &'r RawRow<'_>, aliases: &[&str]) -> Option<&'r CellValue> {
    aliases
        .iter()
        .filter_map(|alias| row.get(alias))
        .find(|cell| !cell.is_missing())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> CellValue {
        CellValue::Text(s.to_string())
    }

    #[test]
    fn header_matching_ignores_case_and_whitespace() {
        for header in ["county", "County", "COUNTY", "  County "] {
            let map = HeaderMap::new([header]);
            let row = RawRow::new(&map, vec![text("Polk")]);
            assert_eq!(
                CanonicalField::County.text(&row).as_deref(),
                Some("Polk"),
                "header {header:?}"
            );
        }
    }

    #[test]
    fn first_alias_wins() {
        let map = HeaderMap::new(["owner_name", "owner"]);
        let row = RawRow::new(&map, vec![text("Second"), text("First")]);
        assert_eq!(CanonicalField::OwnerName.text(&row).as_deref(), Some("First"));
    }

    #[test]
    fn missing_values_fall_through_to_later_aliases() {
        let map = HeaderMap::new(["parcel_id", "parcelid", "parcel"]);
        let row = RawRow::new(&map, vec![text("  "), CellValue::Empty, text("P-9")]);
        assert_eq!(CanonicalField::ParcelId.text(&row).as_deref(), Some("P-9"));

        let row = RawRow::new(&map, vec![text("NULL"), text("n/a"), text("P-10")]);
        assert_eq!(CanonicalField::ParcelId.text(&row).as_deref(), Some("P-10"));
    }

    #[test]
    fn all_missing_resolves_to_none() {
        let map = HeaderMap::new(["acreage", "acres"]);
        let row = RawRow::new(&map, vec![CellValue::Number(f64::NAN), CellValue::Empty]);
        assert!(CanonicalField::Acreage.resolve(&row).is_none());
    }

    #[test]
    fn absent_column_resolves_to_none() {
        let map = HeaderMap::new(["something_else"]);
        let row = RawRow::new(&map, vec![text("x")]);
        assert!(CanonicalField::County.resolve(&row).is_none());
    }

    #[test]
    fn short_rows_read_as_empty() {
        let map = HeaderMap::new(["apn", "county"]);
        let row = RawRow::new(&map, vec![text("1-2-3")]);
        assert_eq!(row.get("county"), Some(&CellValue::Empty));
        assert!(CanonicalField::County.resolve(&row).is_none());
    }

    #[test]
    fn duplicate_headers_keep_first() {
        let map = HeaderMap::new(["APN", "apn"]);
        let row = RawRow::new(&map, vec![text("upper"), text("lower")]);
        assert_eq!(CanonicalField::Apn.text(&row).as_deref(), Some("upper"));
    }

    #[test]
    fn integral_numbers_render_without_fraction() {
        assert_eq!(CellValue::Number(12345.0).as_text().as_deref(), Some("12345"));
        assert_eq!(CellValue::Number(12.5).as_text().as_deref(), Some("12.5"));
    }

    #[test]
    fn number_coercion() {
        assert_eq!(text(" 12.5 ").as_number(), Some(12.5));
        assert_eq!(text("N/A").as_number(), None);
        assert_eq!(text("inf").as_number(), None);
        assert_eq!(CellValue::Bool(true).as_number(), None);
    }

    #[test]
    fn unmatched_headers_are_reported() {
        let map = HeaderMap::new(["APN", "PARCEL_NUM", "County", ""]);
        assert_eq!(map.unmatched(), vec!["PARCEL_NUM"]);
    }
}

//! Geometry normalisation into EPSG:4326 polygons.
//!
//! Every geometry that reaches the store passes through [`normalize`]: parse
//! (WKT, EWKT, or a native geometry from a spatial file), reduce to a single
//! polygon, reproject into the target frame, validate. Anything that fails
//! along the way becomes `None` rather than an error, so one bad cell never
//! costs the rest of its row.
//!
//! # Supported source frames
//!
//! - EPSG:4326 (identity) and EPSG:4269 (NAD83 geographic)
//! - EPSG:3857 and its legacy aliases (Web Mercator)
//! - EPSG:32601–32660 / 32701–32760 (WGS84 UTM north/south)
//! - EPSG:26901–26923 (NAD83 UTM north)
//! - any PROJ string via [`Crs::from_proj_string`]

use std::fmt;
use std::sync::{Arc, LazyLock};

use geo::Area;
use geo_types::{Coord, Geometry, LineString, Polygon};
use proj4rs::proj::Proj;
use proj4rs::transform::transform;
use regex::Regex;
use thiserror::Error;
use tracing::debug;
use wkt::{ToWkt, TryFromWkt};

/// EPSG code of the frame all stored geometry lives in.
pub const TARGET_EPSG: u32 = 4326;

const TARGET_PROJ: &str = "+proj=longlat +datum=WGS84 +no_defs";
const WEB_MERCATOR_PROJ: &str =
    "+proj=merc +a=6378137 +b=6378137 +lat_ts=0 +lon_0=0 +x_0=0 +y_0=0 +k=1 +units=m +no_defs";
const NAD83_LONGLAT_PROJ: &str = "+proj=longlat +ellps=GRS80 +towgs84=0,0,0 +no_defs";

static EPSG_AUTHORITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(?:AUTHORITY|ID)\s*\[\s*"EPSG"\s*,\s*"?(\d+)"?\s*\]"#)
        .expect("EPSG authority pattern")
});

static UTM_ZONE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"UTM[_ ]ZONE[_ ]?(\d{1,2})\s*([NS])").expect("UTM zone pattern")
});

#[derive(Debug, Error)]
pub enum GeometryError {
    #[error("invalid WKT: {0}")]
    Wkt(String),

    #[error("unsupported EPSG code: {0}")]
    UnsupportedEpsg(u32),

    #[error("unrecognised coordinate reference system: {0}")]
    UnrecognisedCrs(String),

    #[error("projection error: {0}")]
    Projection(String),
}

/// A geometry as it arrives from a reader.
#[derive(Debug, Clone)]
pub enum RawGeometry<'a> {
    /// WKT text, optionally prefixed with `SRID=<code>;`.
    Wkt(&'a str),
    /// A geometry decoded by a spatial reader, in its layer's frame.
    Native(Geometry<f64>),
}

/// A source coordinate reference system.
///
/// Cheap to clone; the compiled projection is shared.
#[derive(Clone)]
pub struct Crs {
    label: String,
    source: Option<Arc<Projection>>,
}

struct Projection {
    proj: Proj,
    target: Proj,
    /// Geographic frames take and return radians in proj4rs.
    geographic: bool,
}

impl Crs {
    /// The target frame itself. Reprojection is the identity.
    pub fn wgs84() -> Self {
        Self {
            label: format!("EPSG:{TARGET_EPSG}"),
            source: None,
        }
    }

    /// Look up one of the supported EPSG codes.
    pub fn from_epsg(code: u32) -> Result<Self, GeometryError> {
        let label = format!("EPSG:{code}");
        match code {
            TARGET_EPSG => Ok(Self::wgs84()),
            4269 => Self::compile(label, NAD83_LONGLAT_PROJ, true),
            3857 | 900913 | 102100 | 102113 => Self::compile(label, WEB_MERCATOR_PROJ, false),
            32601..=32660 => Self::compile(label, &utm_proj(code - 32600, false, false), false),
            32701..=32760 => Self::compile(label, &utm_proj(code - 32700, true, false), false),
            26901..=26923 => Self::compile(label, &utm_proj(code - 26900, false, true), false),
            _ => Err(GeometryError::UnsupportedEpsg(code)),
        }
    }

    /// Build a frame from an arbitrary PROJ string.
    pub fn from_proj_string(label: &str, proj: &str) -> Result<Self, GeometryError> {
        let geographic = ["+proj=longlat", "+proj=latlong", "+proj=lonlat", "+proj=latlon"]
            .iter()
            .any(|p| proj.contains(p));
        Self::compile(label.to_string(), proj, geographic)
    }

    /// Resolve the contents of a shapefile `.prj` sidecar (ESRI or OGC WKT).
    ///
    /// An explicit EPSG authority wins. Otherwise the definition is matched
    /// by name against the frames this module knows.
    pub fn from_prj(text: &str) -> Result<Self, GeometryError> {
        let text = text.trim();
        if let Some(code) = EPSG_AUTHORITY
            .captures_iter(text)
            .last()
            .and_then(|caps| caps[1].parse::<u32>().ok())
        {
            return Self::from_epsg(code);
        }

        let upper = text.to_ascii_uppercase();
        let nad83 = upper.contains("NAD_1983")
            || upper.contains("NAD83")
            || upper.contains("NORTH_AMERICAN_DATUM_1983");

        if upper.starts_with("GEOGCS") || upper.starts_with("GEOGCRS") {
            if nad83 {
                return Self::from_epsg(4269);
            }
            if upper.contains("WGS_1984") || upper.contains("WGS 84") || upper.contains("WGS84") {
                return Ok(Self::wgs84());
            }
        }

        if ["MERCATOR_AUXILIARY_SPHERE", "WEB_MERCATOR", "PSEUDO_MERCATOR", "PSEUDO-MERCATOR"]
            .iter()
            .any(|marker| upper.contains(marker))
        {
            return Self::from_epsg(3857);
        }

        if let Some(caps) = UTM_ZONE.captures(&upper)
            && let Ok(zone) = caps[1].parse::<u32>()
        {
            let south = &caps[2] == "S";
            let code = match (nad83, south) {
                (true, false) => 26900 + zone,
                (_, true) => 32700 + zone,
                (false, false) => 32600 + zone,
            };
            return Self::from_epsg(code);
        }

        let mut excerpt: String = text.chars().take(80).collect();
        if excerpt.len() < text.len() {
            excerpt.push('…');
        }
        Err(GeometryError::UnrecognisedCrs(excerpt))
    }

    fn compile(label: String, proj: &str, geographic: bool) -> Result<Self, GeometryError> {
        let source = Proj::from_proj_string(proj)
            .map_err(|e| GeometryError::Projection(format!("{label}: {e:?}")))?;
        let target = Proj::from_proj_string(TARGET_PROJ)
            .map_err(|e| GeometryError::Projection(format!("{TARGET_PROJ}: {e:?}")))?;
        Ok(Self {
            label,
            source: Some(Arc::new(Projection {
                proj: source,
                target,
                geographic,
            })),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// True when geometry in this frame needs no reprojection.
    pub fn is_target(&self) -> bool {
        self.source.is_none()
    }

    fn to_target(&self, c: Coord<f64>) -> Result<Coord<f64>, GeometryError> {
        let Some(projection) = &self.source else {
            return Ok(c);
        };
        let mut point = if projection.geographic {
            (c.x.to_radians(), c.y.to_radians(), 0.0)
        } else {
            (c.x, c.y, 0.0)
        };
        transform(&projection.proj, &projection.target, &mut point)
            .map_err(|e| GeometryError::Projection(format!("{}: {e:?}", self.label)))?;
        Ok(Coord {
            x: point.0.to_degrees(),
            y: point.1.to_degrees(),
        })
    }

    fn reproject_ring(&self, ring: &LineString<f64>) -> Result<LineString<f64>, GeometryError> {
        ring.coords()
            .map(|c| self.to_target(*c))
            .collect::<Result<Vec<_>, _>>()
            .map(LineString::from)
    }

    /// Reproject every ring of a polygon into EPSG:4326.
    pub fn reproject(&self, polygon: &Polygon<f64>) -> Result<Polygon<f64>, GeometryError> {
        if self.is_target() {
            return Ok(polygon.clone());
        }
        let exterior = self.reproject_ring(polygon.exterior())?;
        let interiors = polygon
            .interiors()
            .iter()
            .map(|ring| self.reproject_ring(ring))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Polygon::new(exterior, interiors))
    }
}

impl fmt::Debug for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Crs").field(&self.label).finish()
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

impl PartialEq for Crs {
    fn eq(&self, other: &Self) -> bool {
        self.label == other.label
    }
}

fn utm_proj(zone: u32, south: bool, nad83: bool) -> String {
    let datum = if nad83 {
        "+ellps=GRS80 +towgs84=0,0,0"
    } else {
        "+datum=WGS84"
    };
    let hemisphere = if south { " +south" } else { "" };
    format!("+proj=utm +zone={zone}{hemisphere} {datum} +units=m +no_defs")
}

/// Normalise one geometry into a valid EPSG:4326 polygon.
///
/// `source` is the frame of the input; `None` means EPSG:4326. An EWKT
/// `SRID=` prefix overrides it. Never fails: malformed, empty, non-polygonal,
/// unprojectable, or out-of-frame input yields `None`.
pub fn normalize(raw: RawGeometry<'_>, source: Option<&Crs>) -> Option<Polygon<f64>> {
    match try_normalize(raw, source) {
        Ok(polygon) => polygon,
        Err(e) => {
            debug!(error = %e, "discarding geometry");
            None
        }
    }
}

fn try_normalize(
    raw: RawGeometry<'_>,
    source: Option<&Crs>,
) -> Result<Option<Polygon<f64>>, GeometryError> {
    let srid_crs;
    let (geometry, crs) = match raw {
        RawGeometry::Wkt(text) => {
            let (srid, body) = split_ewkt(text);
            if body.is_empty() {
                return Ok(None);
            }
            let geometry = Geometry::<f64>::try_from_wkt_str(body)
                .map_err(|e| GeometryError::Wkt(e.to_string()))?;
            let crs = match srid {
                Some(code) => {
                    srid_crs = Crs::from_epsg(code)?;
                    Some(&srid_crs)
                }
                None => source,
            };
            (geometry, crs)
        }
        RawGeometry::Native(geometry) => (geometry, source),
    };

    let Some(polygon) = polygonal(geometry) else {
        return Ok(None);
    };
    let polygon = match crs {
        Some(crs) => crs.reproject(&polygon)?,
        None => polygon,
    };
    Ok(validate(polygon))
}

/// Split an optional `SRID=<code>;` prefix off a WKT string.
fn split_ewkt(text: &str) -> (Option<u32>, &str) {
    let text = text.trim();
    if let Some((head, body)) = text.split_once(';')
        && let Some(code) = head
            .trim()
            .strip_prefix("SRID=")
            .or_else(|| head.trim().strip_prefix("srid="))
            .and_then(|code| code.trim().parse().ok())
    {
        return (Some(code), body.trim());
    }
    (None, text)
}

/// Reduce a geometry to one polygon. Multi-part shapes keep their largest part.
fn polygonal(geometry: Geometry<f64>) -> Option<Polygon<f64>> {
    match geometry {
        Geometry::Polygon(polygon) => Some(polygon),
        Geometry::MultiPolygon(parts) => parts
            .0
            .into_iter()
            .max_by(|a, b| a.unsigned_area().total_cmp(&b.unsigned_area())),
        Geometry::Rect(rect) => Some(rect.to_polygon()),
        Geometry::Triangle(triangle) => Some(triangle.to_polygon()),
        _ => None,
    }
}

fn validate(polygon: Polygon<f64>) -> Option<Polygon<f64>> {
    // A closed ring needs at least three distinct positions plus the closing one.
    if polygon.exterior().0.len() < 4 {
        return None;
    }
    let in_frame = polygon
        .exterior()
        .coords()
        .chain(polygon.interiors().iter().flat_map(|ring| ring.coords()))
        .all(|c| {
            c.x.is_finite()
                && c.y.is_finite()
                && (-180.0..=180.0).contains(&c.x)
                && (-90.0..=90.0).contains(&c.y)
        });
    if !in_frame || polygon.unsigned_area() <= 0.0 {
        return None;
    }
    Some(polygon)
}

/// Serialise a polygon as WKT.
pub fn to_wkt(polygon: &Polygon<f64>) -> String {
    polygon.wkt_string()
}

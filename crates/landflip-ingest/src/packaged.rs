//! Zipped shapefile reader.
//!
//! The archive is unpacked into a scoped temporary directory that lives as
//! long as the returned row stream. Every `.shp` layer in the archive is
//! streamed in path order, one feature at a time, and reprojected from its
//! `.prj`. Archives without a
//! shapefile fall back to GeoJSON feature collections.

use std::fs::File;
use std::io::{BufReader, Cursor};
use std::path::{Path, PathBuf};

use geo_types::{Coord, Geometry, LineString, MultiPolygon, Polygon};
use landflip_core::reconcile::header_key;
use landflip_core::{CellValue, Crs, HeaderMap, NewParcel, PipelineConfig, RawRow};
use serde_json::Value;
use shapefile::dbase::{self, FieldValue};
use shapefile::{PolygonRing, Shape, ShapeReader};
use tempfile::TempDir;
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};
use zip::ZipArchive;

use crate::canonical::{GeometrySource, canonicalize, report_unmatched};
use crate::{FormatReader, IngestError, ParcelRows};

pub struct PackagedReader;

impl FormatReader for PackagedReader {
    fn name(&self) -> &'static str {
        "zipped Shapefile"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["zip"]
    }

    fn read<'a>(
        &self,
        bytes: &'a [u8],
        config: &'a PipelineConfig,
    ) -> Result<ParcelRows<'a>, IngestError> {
        let dir = TempDir::new()?;
        let entries = extract(bytes, dir.path())?;
        debug!(entries, dir = %dir.path().display(), "extracted archive");

        let mut layers: Vec<Layer> = find_files(dir.path(), &["shp"])
            .into_iter()
            .map(Layer::Shapefile)
            .collect();
        if layers.is_empty() {
            layers = geojson_layers(dir.path());
        }
        if layers.is_empty() {
            return Err(IngestError::NoGeometryLayerFound);
        }
        info!(layers = layers.len(), "reading geometry layers");

        Ok(Box::new(LayerRows {
            dir,
            layers: layers.into_iter(),
            current: Box::new(std::iter::empty()),
            failed: false,
            config,
        }))
    }
}

enum Layer {
    Shapefile(PathBuf),
    GeoJson { path: PathBuf, features: Vec<Value> },
}

/// Rows from each layer in turn. Holds the extraction directory so it is
/// removed when the stream is dropped, finished or not.
struct LayerRows<'a> {
    dir: TempDir,
    layers: std::vec::IntoIter<Layer>,
    current: ParcelRows<'a>,
    failed: bool,
    config: &'a PipelineConfig,
}

impl<'a> Iterator for LayerRows<'a> {
    type Item = Result<NewParcel, IngestError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            match self.current.next() {
                Some(Ok(parcel)) => return Some(Ok(parcel)),
                Some(Err(e)) => {
                    self.failed = true;
                    return Some(Err(e));
                }
                None => {}
            }
            let layer = self.layers.next()?;
            let opened: Result<ParcelRows<'a>, IngestError> = match layer {
                Layer::Shapefile(path) => ShapefileRows::open(self.dir.path(), &path, self.config)
                    .map(|rows| Box::new(rows) as ParcelRows<'a>),
                Layer::GeoJson { path, features } => Ok(geojson_rows(self.dir.path(), &path, features, self.config)),
            };
            match opened {
                Ok(rows) => self.current = rows,
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

// ── Extraction ──

/// Unpack `bytes` into `dir`, returning the number of files written.
///
/// Entries that would escape `dir` are skipped. File extensions are
/// lower-cased so `PARCELS.SHP` finds its `PARCELS.dbf` sibling.
fn extract(bytes: &[u8], dir: &Path) -> Result<usize, IngestError> {
    let bad_zip = |e: zip::result::ZipError| IngestError::parse(format!("Failed to read ZIP: {e}"));
    let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(bad_zip)?;
    let mut written = 0;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(bad_zip)?;
        let Some(relative) = entry.enclosed_name().map(|p| p.to_path_buf()) else {
            warn!(name = entry.name(), "skipping zip entry outside the archive root");
            continue;
        };
        let target = dir.join(lowercase_extension(&relative));
        if entry.is_dir() {
            std::fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        std::io::copy(&mut entry, &mut out)?;
        written += 1;
    }
    Ok(written)
}

fn lowercase_extension(path: &Path) -> PathBuf {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => path.with_extension(ext.to_lowercase()),
        None => path.to_path_buf(),
    }
}

fn is_metadata(entry: &DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    name == "__MACOSX" || name.starts_with("._")
}

/// Files under `dir` with one of `extensions`, sorted by path.
fn find_files(dir: &Path, extensions: &[&str]) -> Vec<PathBuf> {
    let mut found: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_entry(|e| !is_metadata(e))
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|x| x.to_str())
                .is_some_and(|x| extensions.contains(&x))
        })
        .map(DirEntry::into_path)
        .collect();
    found.sort();
    found
}

fn display_name(root: &Path, path: &Path) -> String {
    path.strip_prefix(root).unwrap_or(path).display().to_string()
}

// ── Shapefile layers ──

/// One shapefile layer, decoded a feature at a time. Shapes are located
/// through the `.shx` index and attributes by record number in the `.dbf`.
struct ShapefileRows<'a> {
    name: String,
    shapes: ShapeReader<BufReader<File>>,
    records: Option<dbase::Reader<BufReader<File>>>,
    header: HeaderMap,
    crs: Crs,
    next: usize,
    count: usize,
    config: &'a PipelineConfig,
}

impl<'a> ShapefileRows<'a> {
    fn open(root: &Path, shp: &Path, config: &'a PipelineConfig) -> Result<Self, IngestError> {
        let name = display_name(root, shp);
        let layer_error = |e: &dyn std::fmt::Display| IngestError::parse(format!("Failed to read {name}: {e}"));

        let crs = layer_crs(shp, &name)?;
        let shapes = ShapeReader::from_path(shp).map_err(|e| layer_error(&e))?;
        let count = shapes.shape_count().map_err(|e| layer_error(&e))?;

        let dbf = shp.with_extension("dbf");
        let (header, records) = if dbf.exists() {
            let reader = dbase::Reader::from_path(&dbf).map_err(|e| layer_error(&e))?;
            let names: Vec<String> = reader.fields().iter().map(|f| f.name().to_string()).collect();
            (HeaderMap::new(names), Some(reader))
        } else {
            warn!(layer = %name, "no .dbf alongside shapefile, attributes empty");
            (HeaderMap::default(), None)
        };
        report_unmatched(&header, &name, config);
        info!(layer = %name, crs = %crs, count, "reading shapefile layer");

        Ok(Self {
            name,
            shapes,
            records,
            header,
            crs,
            next: 0,
            count,
            config,
        })
    }

    fn attributes(&mut self, index: usize) -> Result<Vec<CellValue>, IngestError> {
        let Some(reader) = self.records.as_mut() else {
            return Ok(Vec::new());
        };
        let failed = |e: dbase::Error| IngestError::parse(format!("Failed to read {}: {e}", self.name));
        reader.seek(index).map_err(failed)?;
        let record = match reader.iter_records().next() {
            Some(record) => record.map_err(failed)?,
            None => return Ok(Vec::new()),
        };
        Ok(self
            .header
            .headers()
            .iter()
            .map(|h| record.get(h).map_or(CellValue::Empty, field_cell))
            .collect())
    }
}

impl Iterator for ShapefileRows<'_> {
    type Item = Result<NewParcel, IngestError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.count {
            return None;
        }
        let index = self.next;
        self.next += 1;

        let shape = match self.shapes.read_nth_shape(index)? {
            Ok(shape) => shape,
            Err(e) => {
                self.next = self.count;
                return Some(Err(IngestError::parse(format!("Failed to read {}: {e}", self.name))));
            }
        };
        let cells = match self.attributes(index) {
            Ok(cells) => cells,
            Err(e) => {
                self.next = self.count;
                return Some(Err(e));
            }
        };
        let row = RawRow::new(&self.header, cells);
        let geometry = shape_geometry(shape);
        Some(Ok(canonicalize(
            &row,
            GeometrySource::Native { geometry, crs: &self.crs },
            self.config,
        )))
    }
}

/// The layer's frame from its `.prj`, or EPSG:4326 when there is none.
fn layer_crs(shp: &Path, name: &str) -> Result<Crs, IngestError> {
    let prj = shp.with_extension("prj");
    if !prj.exists() {
        warn!(layer = %name, "no .prj alongside shapefile, assuming EPSG:4326");
        return Ok(Crs::wgs84());
    }
    let text = std::fs::read_to_string(&prj)?;
    Crs::from_prj(&text)
        .map_err(|e| IngestError::parse(format!("Failed to read {name}: {e}")))
}

fn field_cell(value: &FieldValue) -> CellValue {
    match value {
        FieldValue::Character(Some(s)) | FieldValue::Memo(s) => CellValue::Text(s.clone()),
        FieldValue::Numeric(Some(n)) | FieldValue::Double(n) | FieldValue::Currency(n) => {
            CellValue::Number(*n)
        }
        FieldValue::Float(Some(f)) => CellValue::Number(f64::from(*f)),
        FieldValue::Integer(i) => CellValue::Number(f64::from(*i)),
        FieldValue::Logical(Some(b)) => CellValue::Bool(*b),
        FieldValue::Date(Some(d)) => {
            CellValue::Text(format!("{:04}-{:02}-{:02}", d.year(), d.month(), d.day()))
        }
        FieldValue::Character(None)
        | FieldValue::Numeric(None)
        | FieldValue::Float(None)
        | FieldValue::Logical(None)
        | FieldValue::Date(None) => CellValue::Empty,
        other => CellValue::Text(format!("{other:?}")),
    }
}

/// Polygonal shapes as geo geometry. Anything else is absent.
fn shape_geometry(shape: Shape) -> Option<Geometry<f64>> {
    match shape {
        Shape::Polygon(p) => rings_to_geometry(p.rings(), |pt| (pt.x, pt.y)),
        Shape::PolygonM(p) => rings_to_geometry(p.rings(), |pt| (pt.x, pt.y)),
        Shape::PolygonZ(p) => rings_to_geometry(p.rings(), |pt| (pt.x, pt.y)),
        Shape::NullShape => None,
        other => {
            debug!(shape = ?other.shapetype(), "non-polygonal feature, geometry absent");
            None
        }
    }
}

/// Each outer ring starts a polygon; inner rings attach to the latest one.
fn rings_to_geometry<P>(
    rings: &[PolygonRing<P>],
    xy: impl Fn(&P) -> (f64, f64),
) -> Option<Geometry<f64>> {
    let to_line = |points: &[P]| -> LineString<f64> {
        points
            .iter()
            .map(|p| {
                let (x, y) = xy(p);
                Coord { x, y }
            })
            .collect()
    };
    let mut polygons: Vec<Polygon<f64>> = Vec::new();
    for ring in rings {
        match ring {
            PolygonRing::Outer(points) => polygons.push(Polygon::new(to_line(points), vec![])),
            PolygonRing::Inner(points) => {
                if let Some(last) = polygons.last_mut() {
                    last.interiors_push(to_line(points));
                }
            }
        }
    }
    match polygons.len() {
        0 => None,
        1 => polygons.pop().map(Geometry::Polygon),
        _ => Some(Geometry::MultiPolygon(MultiPolygon::new(polygons))),
    }
}

// ── GeoJSON fallback ──

fn geojson_layers(dir: &Path) -> Vec<Layer> {
    find_files(dir, &["geojson", "json"])
        .into_iter()
        .filter_map(|path| {
            let text = std::fs::read_to_string(&path).ok()?;
            let value: Value = match serde_json::from_str(&text) {
                Ok(v) => v,
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "not JSON, skipping");
                    return None;
                }
            };
            if value.get("type").and_then(Value::as_str) != Some("FeatureCollection") {
                debug!(path = %path.display(), "not a FeatureCollection, skipping");
                return None;
            }
            let features = value.get("features")?.as_array()?.clone();
            Some(Layer::GeoJson { path, features })
        })
        .collect()
}

fn geojson_rows<'a>(root: &Path, path: &Path, features: Vec<Value>, config: &'a PipelineConfig) -> ParcelRows<'a> {
    let name = display_name(root, path);
    // Header is the union of property names in first-seen order, one
    // column per header key so `County` and `COUNTY` share a column.
    let mut names: Vec<String> = Vec::new();
    for feature in &features {
        if let Some(props) = feature.get("properties").and_then(Value::as_object) {
            for key in props.keys() {
                if !names.iter().any(|n| header_key(n) == header_key(key)) {
                    names.push(key.clone());
                }
            }
        }
    }
    let header = HeaderMap::new(&names);
    report_unmatched(&header, &name, config);
    info!(layer = %name, count = features.len(), "reading GeoJSON layer");

    let crs = Crs::wgs84();
    Box::new(features.into_iter().map(move |feature| {
        let props = feature.get("properties").and_then(Value::as_object);
        let cells = names
            .iter()
            .map(|n| {
                let key = header_key(n);
                props
                    .and_then(|p| p.iter().find(|(k, _)| header_key(k) == key))
                    .map_or(CellValue::Empty, |(_, v)| json_cell(v))
            })
            .collect();
        let row = RawRow::new(&header, cells);
        let geometry = feature.get("geometry").and_then(json_geometry);
        Ok(canonicalize(&row, GeometrySource::Native { geometry, crs: &crs }, config))
    }))
}

fn json_cell(value: &Value) -> CellValue {
    match value {
        Value::Null => CellValue::Empty,
        Value::String(s) => CellValue::Text(s.clone()),
        Value::Bool(b) => CellValue::Bool(*b),
        Value::Number(n) => n.as_f64().map_or(CellValue::Empty, CellValue::Number),
        other => CellValue::Text(other.to_string()),
    }
}

fn json_geometry(value: &Value) -> Option<Geometry<f64>> {
    fn ring(value: &Value) -> Option<LineString<f64>> {
        value
            .as_array()?
            .iter()
            .map(|pos| {
                let pos = pos.as_array()?;
                Some(Coord {
                    x: pos.first()?.as_f64()?,
                    y: pos.get(1)?.as_f64()?,
                })
            })
            .collect()
    }
    fn polygon(value: &Value) -> Option<Polygon<f64>> {
        let mut rings = value.as_array()?.iter().map(ring);
        let exterior = rings.next()??;
        let interiors = rings.collect::<Option<Vec<_>>>()?;
        Some(Polygon::new(exterior, interiors))
    }

    let coordinates = value.get("coordinates")?;
    match value.get("type")?.as_str()? {
        "Polygon" => polygon(coordinates).map(Geometry::Polygon),
        "MultiPolygon" => coordinates
            .as_array()?
            .iter()
            .map(polygon)
            .collect::<Option<Vec<_>>>()
            .map(|ps| Geometry::MultiPolygon(MultiPolygon::new(ps))),
        _ => None,
    }
}

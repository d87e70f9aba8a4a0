//! `landflip`: ingest parcel files into a DuckDB database, then score,
//! value and export them.
//!
//! Results go to stdout as JSON (or a table for `list`); logs go to stderr.

mod settings;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use landflip_ai::{PipelineError, ValuationError, Valuer, score_all, train_from_store, value_all};
use landflip_core::{ParcelStatus, PipelineConfig, parcels_to_batch};
use landflip_ingest::{Format, IngestError, ingest_as, resolve_format};
use landflip_store::{
    DEFAULT_GEOJSON_LIMIT, DEFAULT_LIST_LIMIT, DuckStore, ParcelFilter, ParcelStore, StoreError,
    export, feature_collection,
};
use serde_json::json;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use settings::Overrides;

#[derive(Parser, Debug)]
#[command(name = "landflip", version, about = "Parcel ingestion, lead scoring and valuation")]
struct Cli {
    /// DuckDB database file
    #[arg(long, global = true, env = "LANDFLIP_DB", default_value = "landflip.duckdb")]
    db: PathBuf,

    /// TOML pipeline configuration
    #[arg(long, global = true, env = "LANDFLIP_CONFIG")]
    config: Option<PathBuf>,

    /// Valuation model artifact path
    #[arg(long = "model", global = true, env = "MODEL_PATH")]
    model_path: Option<PathBuf>,

    /// Records per committed batch
    #[arg(long, global = true, env = "LANDFLIP_BATCH_SIZE")]
    batch_size: Option<usize>,

    /// Log unrecognised columns at warn level
    #[arg(long, global = true)]
    warn_unmatched: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest a CSV/TXT, XLSX/XLS or zipped shapefile
    Ingest {
        file: PathBuf,
        /// Force a reader: csv, xlsx or shapefile
        #[arg(long)]
        format: Option<Format>,
    },
    /// Score every stored parcel
    Score,
    /// Value every stored parcel
    Value,
    /// Train the valuation model on every stored parcel
    Train,
    /// List stored parcels, newest first
    List {
        #[arg(long)]
        owner: Option<String>,
        #[arg(long)]
        county: Option<String>,
        #[arg(long)]
        state: Option<String>,
        #[arg(long, value_parser = parse_status)]
        status: Option<ParcelStatus>,
        #[arg(long, default_value_t = DEFAULT_LIST_LIMIT)]
        limit: usize,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Export parcels as a GeoJSON FeatureCollection
    Geojson {
        #[arg(long, default_value_t = DEFAULT_GEOJSON_LIMIT)]
        limit: usize,
    },
}

fn parse_status(s: &str) -> Result<ParcelStatus, String> {
    ParcelStatus::parse(s).ok_or_else(|| {
        let known: Vec<_> = ParcelStatus::ALL.iter().map(|s| s.as_str()).collect();
        format!("unknown status {s:?} (expected one of {})", known.join(", "))
    })
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    info!("landflip v{}", env!("CARGO_PKG_VERSION"));

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let status = status_code(&e);
            error!(status, "{e:#}");
            println!("{}", error_body(&e, status));
            if status < 500 { ExitCode::from(2) } else { ExitCode::FAILURE }
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = settings::resolve(&Overrides {
        config: cli.config,
        model_path: cli.model_path,
        batch_size: cli.batch_size,
        warn_unmatched: cli.warn_unmatched,
    })?;
    let db = cli.db;

    match cli.command {
        Command::Ingest { file, format } => cmd_ingest(&db, &file, format, &config),
        Command::Score => {
            let scored = score_all(&mut open_store(&db)?).context("scoring parcels")?;
            print_json(&json!({ "scored": scored }))
        }
        Command::Value => {
            let valuer = Valuer::load(&config.model_path);
            let valued = value_all(&mut open_store(&db)?, &valuer).context("valuing parcels")?;
            print_json(&json!({ "valued": valued }))
        }
        Command::Train => {
            let artifact =
                train_from_store(&open_store(&db)?, &config.model_path).context("training valuation model")?;
            print_json(&json!({
                "model": artifact.path.display().to_string(),
                "samples": artifact.samples,
                "trained_at": artifact.trained_at.to_rfc3339(),
            }))
        }
        Command::List {
            owner,
            county,
            state,
            status,
            limit,
            json,
        } => {
            let filter = ParcelFilter {
                owner_name: owner,
                county,
                state,
                status,
                limit,
            };
            cmd_list(&open_store(&db)?, &filter, json)
        }
        Command::Geojson { limit } => {
            let collection = feature_collection(&open_store(&db)?, limit).context("exporting GeoJSON")?;
            print_json(&collection)
        }
    }
}

fn open_store(path: &Path) -> Result<DuckStore> {
    DuckStore::open_persistent(path).with_context(|| format!("opening database {}", path.display()))
}

// ── Commands ──

/// The file is read and its format checked before the database is opened,
/// so a rejected upload leaves no database behind.
fn cmd_ingest(db: &Path, file: &Path, format: Option<Format>, config: &PipelineConfig) -> Result<()> {
    let filename = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let format = resolve_format(&filename, format)?;
    let bytes = std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;
    let mut store = open_store(db)?;
    let summary = ingest_as(format, &mut store, &filename, &bytes, config)
        .with_context(|| format!("ingesting {filename}"))?;
    print_json(&json!({ "ingested": summary.ingested }))
}

fn cmd_list(store: &DuckStore, filter: &ParcelFilter, as_json: bool) -> Result<()> {
    let parcels = store.list(filter).context("listing parcels")?;
    if as_json {
        let rows: Vec<_> = parcels
            .iter()
            .map(|p| export::feature(p)["properties"].clone())
            .collect();
        return print_json(&serde_json::Value::Array(rows));
    }
    let batch = parcels_to_batch(&parcels).context("building parcel table")?;
    let table = arrow::util::pretty::pretty_format_batches(&[batch]).context("formatting table")?;
    println!("{table}");
    Ok(())
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// JSON error body. Carries the number of records already committed when
/// an upload failed part way.
fn error_body(err: &anyhow::Error, status: u16) -> serde_json::Value {
    let mut body = json!({ "detail": format!("{err:#}"), "status": status });
    if let Some(persisted) = err.downcast_ref::<IngestError>().and_then(IngestError::persisted) {
        body["persisted"] = json!(persisted);
    }
    body
}

/// HTTP-style status for a failed command.
fn status_code(err: &anyhow::Error) -> u16 {
    if let Some(e) = err.downcast_ref::<IngestError>() {
        e.status_code()
    } else if let Some(e) = err.downcast_ref::<PipelineError>() {
        e.status_code()
    } else if let Some(e) = err.downcast_ref::<ValuationError>() {
        e.status_code()
    } else if err.downcast_ref::<StoreError>().is_some() {
        500
    } else {
        400
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_ingest_with_format() {
        let cli = Cli::try_parse_from(["landflip", "ingest", "leads.txt", "--format", "csv"]).unwrap();
        match cli.command {
            Command::Ingest { file, format } => {
                assert_eq!(file, PathBuf::from("leads.txt"));
                assert_eq!(format, Some(Format::Delimited));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_list_filters() {
        let cli = Cli::try_parse_from([
            "landflip", "list", "--county", "polk", "--status", "under_contract", "--limit", "10",
        ])
        .unwrap();
        match cli.command {
            Command::List {
                county, status, limit, ..
            } => {
                assert_eq!(county.as_deref(), Some("polk"));
                assert_eq!(status, Some(ParcelStatus::UnderContract));
                assert_eq!(limit, 10);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(Cli::try_parse_from(["landflip", "list", "--status", "sold"]).is_err());
    }

    #[test]
    fn client_errors_map_to_400() {
        let err = anyhow::Error::new(IngestError::UnsupportedFormat("x".into())).context("ingesting x.pdf");
        assert_eq!(status_code(&err), 400);
        let err = anyhow::Error::new(PipelineError::Valuation(ValuationError::NoTrainingData));
        assert_eq!(status_code(&err), 400);
        let err = anyhow::Error::new(StoreError::Other("disk".into()));
        assert_eq!(status_code(&err), 500);
    }

    #[test]
    fn error_body_reports_committed_records() {
        let err = anyhow::Error::new(IngestError::Storage {
            persisted: 500,
            source: StoreError::Other("disk full".into()),
        })
        .context("ingesting big.csv");
        let body = error_body(&err, status_code(&err));
        assert_eq!(body["status"], 500);
        assert_eq!(body["persisted"], 500);

        let err = anyhow::Error::new(IngestError::NoGeometryLayerFound);
        assert!(error_body(&err, 400).get("persisted").is_none());
    }

    #[test]
    fn rejected_upload_does_not_create_a_database() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("test.duckdb");
        let pdf = dir.path().join("leads.pdf");
        std::fs::write(&pdf, b"%PDF-1.4").unwrap();

        let err = cmd_ingest(&db, &pdf, None, &PipelineConfig::default()).unwrap_err();
        assert_eq!(status_code(&err), 400);
        assert!(!db.exists());

        let csv = dir.path().join("leads.csv");
        std::fs::write(&csv, "county\nPolk\n").unwrap();
        let err = cmd_ingest(&db, &csv, Some(Format::Packaged), &PipelineConfig::default()).unwrap_err();
        assert_eq!(status_code(&err), 400);
        assert!(!db.exists());
    }

    #[test]
    fn ingest_score_value_against_a_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("test.duckdb");
        let csv = dir.path().join("leads.csv");
        std::fs::write(&csv, "parcel,owner,County,acreage\nP-1,Jane Doe,Polk,12.5\n").unwrap();
        let config = PipelineConfig {
            model_path: dir.path().join("model.json"),
            ..Default::default()
        };

        cmd_ingest(&db, &csv, None, &config).unwrap();
        let mut store = open_store(&db).unwrap();
        assert_eq!(score_all(&mut store).unwrap(), 1);
        assert_eq!(value_all(&mut store, &Valuer::load(&config.model_path)).unwrap(), 1);

        let parcels = store.all_parcels().unwrap();
        let parcel = &parcels[0];
        assert_eq!(parcel.score, Some(65));
        assert_eq!(parcel.valuation, Some(31_250.0));
        cmd_list(&store, &ParcelFilter::default(), false).unwrap();
    }
}

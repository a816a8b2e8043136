//! CLI entry point for the traffic feed reconciler.
//!
//! Provides subcommands for live ingestion of configured feeds, merging an
//! archive of downloaded snapshots, auditing raw field changes and archiving
//! feed documents.

mod infra;

use anyhow::Result;
use chrono::TimeDelta;
use clap::{Parser, Subcommand};
use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};
use waze_reconciler::{
    audit::audit_archive,
    batch::{export, merge_archive},
    config::{CityFilter, SourcesConfig, SweepConfig},
    download::{run_download, targets},
    fetch::BasicClient,
    live::{LiveIngest, LiveSource, run_live},
    output::{JsonDirSink, write_json},
    reconcile::EntityStore,
    shutdown::Shutdown,
};

#[derive(Parser)]
#[command(name = "waze_reconciler")]
#[command(about = "Reconcile traffic feed snapshots into alert and jam histories", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the configured feeds and keep per-source stores up to date
    Ingest {
        /// JSON file listing the sources to ingest
        #[arg(short, long, default_value = "sources.json")]
        sources: String,

        /// Directory holding one sub-directory per source
        #[arg(short, long, default_value = "live_output")]
        output_dir: String,

        /// Seconds between polling cycles
        #[arg(short, long, default_value_t = 120)]
        interval: u64,

        /// Number of cycles to run (0 = until interrupted)
        #[arg(short = 'n', long, default_value_t = 0)]
        cycles: usize,

        /// Entities unseen for longer than this many minutes become inactive
        #[arg(long, default_value_t = 3)]
        inactivity_minutes: i64,

        /// Deactivate stale entities on every n-th cycle
        #[arg(long, default_value_t = 5)]
        sweep_every: usize,

        /// Continue from the checkpoints in the output directory
        #[arg(long, default_value_t = false)]
        resume: bool,
    },
    /// Merge an archive of downloaded snapshots into full alert and jam exports
    Merge {
        /// Directory containing data_<KEY>_<date>_<time>.json files
        #[arg(short, long)]
        data_dir: String,

        /// Feed key to merge; required when the directory holds several feeds
        #[arg(short, long)]
        key: Option<String>,

        /// Directory to write alerts_full.json, jams_full.json and changes.csv to
        #[arg(short, long, default_value = "outputs_full")]
        output_dir: String,

        /// Only export entities of this city
        #[arg(long, conflicts_with = "except_city")]
        city: Option<String>,

        /// Export everything except entities of this city
        #[arg(long)]
        except_city: Option<String>,

        /// A pause between snapshots longer than this many minutes ends
        /// everything seen before it
        #[arg(long, default_value_t = 60)]
        gap_minutes: i64,

        /// Optional: S3 bucket to upload the exported files to
        #[arg(long)]
        s3_bucket: Option<String>,

        /// Key prefix for uploaded files
        #[arg(long, default_value = "")]
        s3_prefix: String,

        /// Optional: Gzip compress files before uploading to S3
        #[arg(long, default_value_t = false)]
        gzip: bool,
    },
    /// Report raw field changes between consecutive appearances in an archive
    Audit {
        /// Directory containing archived snapshots
        #[arg(short, long)]
        data_dir: String,

        /// Feed key to audit; required when the directory holds several feeds
        #[arg(short, long)]
        key: Option<String>,

        /// Optional JSON file to write the changes to
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Archive the raw feed documents of the configured sources
    Download {
        /// JSON file listing the sources to download
        #[arg(short, long, default_value = "sources.json")]
        sources: String,

        /// Root directory of the archive (one sub-directory per feed)
        #[arg(short, long, default_value = "data")]
        output_dir: String,

        /// Seconds between downloads
        #[arg(short, long, default_value_t = 120)]
        interval: u64,

        /// Number of rounds (0 = until interrupted)
        #[arg(short = 'n', long, default_value_t = 0)]
        rounds: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/waze_reconciler.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("waze_reconciler.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Ingest {
            sources,
            output_dir,
            interval,
            cycles,
            inactivity_minutes,
            sweep_every,
            resume,
        } => {
            let config = SourcesConfig::load(&sources)?;
            let sink = JsonDirSink::new(&output_dir);

            let mut live_sources = Vec::with_capacity(config.len());
            for source in config.iter() {
                let store = if resume {
                    sink.load_checkpoint(&source.name)?
                } else {
                    EntityStore::new()
                };
                live_sources.push(LiveSource::from_config(source, store)?);
            }

            let sweep = SweepConfig {
                inactivity_window: TimeDelta::minutes(inactivity_minutes),
                sweep_every,
                ..SweepConfig::default()
            };
            let mut ingest = LiveIngest::new(live_sources, sweep);
            info!(sources = config.len(), output_dir, "Starting live ingestion");

            let client = Arc::new(BasicClient::new()?);
            run_live(client, &mut ingest, &sink, interval, cycles, Shutdown::on_ctrl_c()).await?;
        }
        Commands::Merge {
            data_dir,
            key,
            output_dir,
            city,
            except_city,
            gap_minutes,
            s3_bucket,
            s3_prefix,
            gzip,
        } => {
            let filter = match (city, except_city) {
                (Some(city), _) => CityFilter::Only(city),
                (None, Some(city)) => CityFilter::Except(city),
                (None, None) => CityFilter::Any,
            };

            let sweep = SweepConfig {
                gap_threshold: TimeDelta::minutes(gap_minutes),
                ..SweepConfig::default()
            };
            let outcome = merge_archive(Path::new(&data_dir), key.as_deref(), &sweep)?;
            if !outcome.skipped.is_empty() {
                warn!(count = outcome.skipped.len(), "Some snapshots were skipped");
            }
            let written = export(&outcome, Path::new(&output_dir), &filter)?;

            match s3_bucket {
                Some(bucket) => {
                    info!(bucket = %bucket, gzip, "S3 upload enabled");
                    let s3 = infra::s3::client().await;
                    infra::s3::upload_files(&s3, &bucket, &s3_prefix, &written, gzip).await?;
                }
                None => info!("S3 bucket not specified, skipping upload"),
            }
        }
        Commands::Audit {
            data_dir,
            key,
            output,
        } => {
            let changes = audit_archive(Path::new(&data_dir), key.as_deref())?;
            if let Some(output) = output {
                write_json(Path::new(&output), &changes)?;
                info!(output, changes = changes.len(), "Audit written");
            }
        }
        Commands::Download {
            sources,
            output_dir,
            interval,
            rounds,
        } => {
            let config = SourcesConfig::load(&sources)?;
            let targets = targets(&config)?;
            info!(feeds = targets.len(), output_dir, "Starting downloads");

            let client = Arc::new(BasicClient::new()?);
            let root = Path::new(&output_dir);
            run_download(client, &targets, root, interval, rounds, Shutdown::on_ctrl_c()).await?;
        }
    }

    Ok(())
}

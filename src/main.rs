//! CLI entry point for the MTA real-time pipeline.
//!
//! Provides subcommands for running a collection cycle over the subway
//! feeds and for inspecting and pruning the stored snapshots.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use mta_rt_pipeline::fetch::{BasicClient, FetchOptions};
use mta_rt_pipeline::output::print_json;
use mta_rt_pipeline::pipeline::{FeedSelection, Pipeline, PipelineOptions};
use mta_rt_pipeline::registry::FeedRegistry;
use mta_rt_pipeline::store::FileStore;
use mta_rt_pipeline::validate::{Bounds, Validator};
use std::ffi::OsStr;
use tracing::{info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "mta_rt_pipeline")]
#[command(about = "Collects and inspects MTA subway real-time feeds", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one fetch-decode-validate-store cycle
    Collect {
        /// Line codes to cover (repeatable), e.g. -l L -l 7
        #[arg(short, long = "line")]
        lines: Vec<String>,

        /// Feed ids to cover (repeatable), e.g. -f ace
        #[arg(short, long = "feed")]
        feeds: Vec<String>,

        /// Cover every feed in the registry
        #[arg(long)]
        all: bool,

        /// Snapshot store root
        #[arg(long, default_value = "data")]
        data_dir: PathBuf,

        /// Run-log CSV directory
        #[arg(long, default_value = "runs")]
        csv_dir: PathBuf,

        /// Per-attempt fetch timeout in seconds
        #[arg(long, default_value_t = 10)]
        timeout_secs: u64,

        /// Retries after the first attempt
        #[arg(long, default_value_t = 3)]
        max_retries: u32,

        /// Staleness threshold in seconds
        #[arg(long, default_value_t = 600)]
        freshness_secs: u64,

        /// Maximum concurrent feed fetches
        #[arg(long, default_value_t = 4)]
        concurrency: usize,
    },
    /// Print a stored snapshot as JSON
    Show {
        /// Feed id to show
        #[arg(short, long)]
        feed: String,

        /// Newest snapshot at or before this RFC 3339 instant (default: latest)
        #[arg(long)]
        at: Option<DateTime<Utc>>,

        /// Snapshot store root
        #[arg(long, default_value = "data")]
        data_dir: PathBuf,
    },
    /// List stored snapshot timestamps for a feed
    Snapshots {
        /// Feed id to list
        #[arg(short, long)]
        feed: String,

        /// Only snapshots at or after this RFC 3339 instant
        #[arg(long)]
        since: Option<DateTime<Utc>>,

        /// Snapshot store root
        #[arg(long, default_value = "data")]
        data_dir: PathBuf,
    },
    /// Delete all but the newest snapshots
    Prune {
        /// Feed id to prune (default: every feed in the store)
        #[arg(short, long)]
        feed: Option<String>,

        /// Number of newest snapshots to keep per feed
        #[arg(short, long)]
        keep: usize,

        /// Snapshot store root
        #[arg(long, default_value = "data")]
        data_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/mta_rt_pipeline.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("mta_rt_pipeline.log"));

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
        Commands::Collect {
            lines,
            feeds,
            all,
            data_dir,
            csv_dir,
            timeout_secs,
            max_retries,
            freshness_secs,
            concurrency,
        } => {
            let selection = selection_from_args(lines, feeds, all)?;
            collect(
                selection,
                &data_dir,
                csv_dir,
                timeout_secs,
                max_retries,
                freshness_secs,
                concurrency,
            )
            .await?;
        }
        Commands::Show { feed, at, data_dir } => {
            let store = FileStore::new(&data_dir)?;
            let snapshot = match at {
                Some(at) => store.load_at_or_before(&feed, at)?,
                None => store.load_latest(&feed)?,
            };
            info!(feed_id = %snapshot.feed_id, timestamp = %snapshot.timestamp, "loaded snapshot");
            print_json(&snapshot.document)?;
        }
        Commands::Snapshots {
            feed,
            since,
            data_dir,
        } => {
            let store = FileStore::new(&data_dir)?;
            let timestamps = store.list_snapshots(&feed, since)?;
            info!(feed_id = %feed, count = timestamps.len(), "snapshots listed");
            for ts in timestamps {
                println!("{}", ts.to_rfc3339());
            }
        }
        Commands::Prune {
            feed,
            keep,
            data_dir,
        } => {
            let store = FileStore::new(&data_dir)?;
            let feed_ids = match feed {
                Some(id) => vec![id],
                None => store.feed_ids()?,
            };
            for feed_id in feed_ids {
                let outcome = store.prune(&feed_id, keep)?;
                for (path, error) in &outcome.failures {
                    warn!(path = %path.display(), %error, "could not delete snapshot file");
                }
                info!(
                    feed_id = %feed_id,
                    removed = outcome.removed,
                    failures = outcome.failures.len(),
                    "feed pruned"
                );
            }
        }
    }

    Ok(())
}

fn selection_from_args(
    lines: Vec<String>,
    feeds: Vec<String>,
    all: bool,
) -> Result<FeedSelection> {
    match (all, lines.is_empty(), feeds.is_empty()) {
        (true, true, true) => Ok(FeedSelection::All),
        (false, false, true) => Ok(FeedSelection::Lines(lines)),
        (false, true, false) => Ok(FeedSelection::Feeds(feeds)),
        (false, true, true) => bail!("select feeds with --line, --feed, or --all"),
        _ => bail!("--line, --feed, and --all are mutually exclusive"),
    }
}

async fn collect(
    selection: FeedSelection,
    data_dir: &Path,
    csv_dir: PathBuf,
    timeout_secs: u64,
    max_retries: u32,
    freshness_secs: u64,
    concurrency: usize,
) -> Result<()> {
    let options = PipelineOptions {
        concurrency,
        fetch: FetchOptions {
            timeout: Duration::from_secs(timeout_secs),
            max_retries,
            ..FetchOptions::default()
        },
        csv_dir: Some(csv_dir),
    };
    let validator = Validator::new(Duration::from_secs(freshness_secs), Bounds::nyc());
    let pipeline = Pipeline::new(
        FeedRegistry::nyct(),
        Arc::new(BasicClient::new()),
        FileStore::new(data_dir)?,
        validator,
        options,
    );

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, letting in-flight feeds finish");
                cancel.store(true, Ordering::SeqCst);
            }
        });
    }

    let result = pipeline.run_with_cancel(selection, cancel).await?;
    print_json(&result.totals)?;
    Ok(())
}

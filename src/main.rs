//! Binary entry point for imgdedup.
//!
//! This binary provides the CLI interface for the image deduplication engine.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr in main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
#![allow(clippy::multiple_crate_versions)]

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use imgdedup::config::AppConfig;
use imgdedup::observability;
use imgdedup::services::deduplication::{normalize_scope, origin_scope};
use imgdedup::services::{
    BatchRunner, CancelFlag, DedupCoordinator, DirectorySink, HttpFetcher, UrlCanonicalizer,
};
use imgdedup::storage::SqliteStore;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use std::io::BufRead;
use tokio::sync::mpsc;

/// Capacity of the channel between the stdin reader and the batch runner.
const STDIN_CHANNEL_CAPACITY: usize = 64;

/// imgdedup - download images once, no matter how often they are linked.
#[derive(Parser)]
#[command(name = "imgdedup")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Download new images, skipping known URLs and known content.
    Fetch {
        /// Candidate image URLs.
        urls: Vec<String>,

        /// Read candidates from a file, one per line (`-` for stdin).
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Output directory (overrides `[download].output_dir`).
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Origin scope for history (default: origin of the first URL).
        #[arg(long)]
        scope: Option<String>,

        /// Enable the size filter with this minimum in KiB.
        #[arg(long)]
        min_size_kb: Option<u64>,

        /// Pause between candidates in milliseconds.
        #[arg(long)]
        delay_ms: Option<u64>,

        /// Keep file names from the URL where possible.
        #[arg(long)]
        no_rename: bool,

        /// Fetch thumbnails as linked instead of resolving originals.
        #[arg(long)]
        keep_thumbnails: bool,

        /// Do not skip candidates with unsupported extensions.
        #[arg(long)]
        all_formats: bool,
    },

    /// Show history counters.
    Status {
        /// Origin scope (default: every scope in the store).
        #[arg(long)]
        scope: Option<String>,

        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Forget every URL and digest recorded for an origin.
    Clear {
        /// Origin scope to clear.
        #[arg(long)]
        scope: String,
    },

    /// Print the canonical key and scope for each URL.
    Canonicalize {
        /// URLs to canonicalize.
        #[arg(required = true)]
        urls: Vec<String>,
    },
}

/// Main entry point.
#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match AppConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        },
    };

    if let Err(e) = observability::init_from_config(Some(&config.logging), cli.verbose) {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    match run_command(cli.command, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

/// Runs the selected command.
async fn run_command(command: Commands, mut config: AppConfig) -> Result<()> {
    match command {
        Commands::Fetch {
            urls,
            input,
            out,
            scope,
            min_size_kb,
            delay_ms,
            no_rename,
            keep_thumbnails,
            all_formats,
        } => {
            if let Some(kb) = min_size_kb {
                config.dedup = config.dedup.with_size_filter(true).with_min_size_kb(kb);
            }
            if let Some(ms) = delay_ms {
                config.dedup = config
                    .dedup
                    .with_inter_item_delay(Duration::from_millis(ms));
            }
            if let Some(dir) = out {
                config.download.output_dir = dir;
            }
            config.download.rename &= !no_rename;
            config.download.prefer_original &= !keep_thumbnails;
            config.download.filter_extensions &= !all_formats;
            cmd_fetch(&config, urls, input.as_deref(), scope).await
        },

        Commands::Status { scope, json } => cmd_status(&config, scope, json),

        Commands::Clear { scope } => cmd_clear(&config, &scope).await,

        Commands::Canonicalize { urls } => {
            cmd_canonicalize(&config, &urls);
            Ok(())
        },
    }
}

/// Opens the history store for one scope.
fn open_store(config: &AppConfig, scope: &str) -> Result<Arc<SqliteStore>> {
    let path = config.history_db_path();
    let store = SqliteStore::open(&path, scope)
        .with_context(|| format!("opening history store {}", path.display()))?;
    Ok(Arc::new(store))
}

/// Fetch command.
async fn cmd_fetch(
    config: &AppConfig,
    mut urls: Vec<String>,
    input: Option<&Path>,
    scope: Option<String>,
) -> Result<()> {
    let streaming = input.is_some_and(|p| p.as_os_str() == "-");
    if let Some(path) = input.filter(|_| !streaming) {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading candidates from {}", path.display()))?;
        urls.extend(candidate_lines(&contents));
    }

    let scope = match scope {
        Some(scope) => normalize_scope(&scope),
        None if streaming => bail!("--scope is required when reading candidates from stdin"),
        None => match urls.first() {
            Some(first) => origin_scope(first),
            None => bail!("no candidate URLs given"),
        },
    };

    let store = open_store(config, &scope)?;
    let mut engine = DedupCoordinator::init(config.dedup.clone(), store)?;
    let fetcher = HttpFetcher::new(&config.http);
    let sink = DirectorySink::new(&config.download.output_dir);

    let cancel = CancelFlag::new();
    let handler_flag = cancel.clone();
    ctrlc::set_handler(move || handler_flag.cancel())
        .context("installing Ctrl-C handler")?;

    let runner = BatchRunner::new(config.download.batch_options(), cancel);
    tracing::info!(scope = %scope, output = %sink.dir().display(), "Starting batch");

    let report = if streaming {
        let (tx, rx) = mpsc::channel(STDIN_CHANNEL_CAPACITY);
        // A plain thread: a blocked stdin read must not hold up runtime
        // shutdown after a cancel.
        std::thread::spawn(move || read_stdin_candidates(urls, &tx));
        runner.run_incremental(&mut engine, rx, &fetcher, &sink).await
    } else {
        runner.run(&mut engine, urls, &fetcher, &sink).await
    };

    let persisted = engine.shutdown().await;
    println!("{report}");
    println!("History: {}", persisted.as_str());
    for path in &report.saved_paths {
        println!("  {}", path.display());
    }
    Ok(())
}

/// Feeds positional URLs, then stdin lines, into the batch channel.
///
/// Returns once stdin ends or the runner stops receiving.
fn read_stdin_candidates(initial: Vec<String>, tx: &mpsc::Sender<String>) {
    for url in initial {
        if tx.blocking_send(url).is_err() {
            return;
        }
    }
    for line in std::io::stdin().lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read stdin");
                return;
            },
        };
        let Some(url) = candidate_lines(&line).next() else {
            continue;
        };
        if tx.blocking_send(url).is_err() {
            return;
        }
    }
}

/// Non-empty, non-comment lines, trimmed.
fn candidate_lines(text: &str) -> impl Iterator<Item = String> + '_ {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(ToString::to_string)
}

/// Status command.
fn cmd_status(config: &AppConfig, scope: Option<String>, json: bool) -> Result<()> {
    let scopes = match scope {
        Some(scope) => vec![normalize_scope(&scope)],
        None => {
            let path = config.history_db_path();
            if !path.exists() {
                println!("No history at {}", path.display());
                return Ok(());
            }
            SqliteStore::open(&path, "")
                .and_then(|store| store.scopes())
                .with_context(|| format!("listing scopes in {}", path.display()))?
        },
    };

    let mut statuses = Vec::with_capacity(scopes.len());
    for scope in &scopes {
        let engine = DedupCoordinator::init(config.dedup.clone(), open_store(config, scope)?)?;
        statuses.push(engine.status());
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&statuses)?);
    } else if statuses.is_empty() {
        println!("No history recorded");
    } else {
        for status in &statuses {
            println!("{status}");
        }
    }
    Ok(())
}

/// Clear command.
async fn cmd_clear(config: &AppConfig, scope: &str) -> Result<()> {
    let scope = normalize_scope(scope);
    let mut engine = DedupCoordinator::init(config.dedup.clone(), open_store(config, &scope)?)?;
    let outcome = engine.clear_history().await;
    println!("Cleared history for {scope}: {}", outcome.as_str());
    Ok(())
}

/// Canonicalize command.
fn cmd_canonicalize(config: &AppConfig, urls: &[String]) {
    let canonicalizer =
        UrlCanonicalizer::new(&config.dedup.volatile_params, &config.dedup.volatile_prefixes);
    for url in urls {
        println!(
            "{}\t{}",
            canonicalizer.canonicalize(url),
            origin_scope(url)
        );
    }
}

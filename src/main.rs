//! Travelsync CLI
//!
//! Command-line interface for route synchronization:
//! - Catch every route up to the last local midnight
//! - Backfill an explicit date range to a standalone file
//! - Show per-route sync status
//! - Generate a default config file

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use travelsync::config::generate_default_config;
use travelsync::{
    AcyclicaSource, Config, CsvSyncStore, LoggingConfig, SeriesRegistry, SeriesSyncController,
    SyncStore,
};

#[derive(Parser)]
#[command(name = "travelsync")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Keep per-route travel-time tables caught up")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: search standard locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Catch routes up to the most recent local midnight
    Sync {
        /// Route ids to sync (default: all)
        #[arg(short, long)]
        series: Vec<String>,
    },

    /// Download whole local days to a standalone file per route
    Backfill {
        /// First day, YYYY-MM-DD
        #[arg(long)]
        from: NaiveDate,
        /// Last day (inclusive), YYYY-MM-DD
        #[arg(long)]
        to: NaiveDate,
        /// Route ids to backfill (default: all)
        #[arg(short, long)]
        series: Vec<String>,
    },

    /// Show tail and pending windows per route
    Status {
        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Serialize)]
struct SeriesStatus {
    id: String,
    name: String,
    tail: Option<String>,
    next_start: String,
    pending_windows: usize,
    records: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Config { output } = &cli.command {
        let content = generate_default_config();
        match output {
            Some(path) => {
                std::fs::write(path, content)
                    .with_context(|| format!("writing config to {}", path.display()))?;
                println!("Config written to {}", path.display());
            }
            None => print!("{}", content),
        }
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default()?,
    };
    init_tracing(&config.logging);

    tracing::info!("Travelsync v{}", env!("CARGO_PKG_VERSION"));

    // Everything a run needs is validated before any route is touched
    let settings = config.sync_settings()?;
    let registry = SeriesRegistry::load(&config.storage.registry_path())?;
    let data_dir = config.storage.data_dir();
    let store = Arc::new(CsvSyncStore::new(&data_dir, settings.timezone));
    tracing::info!("Data directory: {:?}", data_dir);

    match cli.command {
        Commands::Sync { series } => {
            let selected = registry.select(&series)?;
            let source = Arc::new(AcyclicaSource::new(config.acyclica()?)?);
            let controller = SeriesSyncController::new(store, source, settings);

            let summary = controller.sync_all(&selected, Utc::now()).await;

            for report in &summary.synced {
                if let Some(err) = &report.prune_error {
                    eprintln!("warning: {} synced but prune failed: {}", report.series_name, err);
                }
            }
            for failure in &summary.failed {
                eprintln!("error: route {}: {}", failure.series_id, failure.error);
            }
            println!("{}", summary.completion_message());

            if summary.has_failures() {
                std::process::exit(1);
            }
        }

        Commands::Backfill { from, to, series } => {
            anyhow::ensure!(from <= to, "start date {} is after end date {}", from, to);

            let selected = registry.select(&series)?;
            let source = Arc::new(AcyclicaSource::new(config.acyclica()?)?);
            let controller =
                SeriesSyncController::new(store.clone(), source, settings);

            let days = (to - from).num_days() + 1;
            println!("Requesting {} total days of data.", days);

            let mut failed = 0usize;
            for s in &selected {
                match controller.backfill(s, from, to).await {
                    Ok(data) => {
                        let path = store.write_export(s, from, to, &data.records)?;
                        println!("{}: {} records -> {}", s.name(), data.records.len(), path.display());
                    }
                    Err(e) => {
                        failed += 1;
                        tracing::error!(series = s.id(), error = %e, "Backfill failed");
                        eprintln!("error: route {}: {}", s.id(), e);
                    }
                }
            }

            let routes = selected.len() - failed;
            println!(
                "Operation complete. {} {} of data for {} {} downloaded and formatted.",
                days,
                if days == 1 { "day" } else { "days" },
                routes,
                if routes == 1 { "route" } else { "routes" },
            );
            if failed > 0 {
                std::process::exit(1);
            }
        }

        Commands::Status { json } => {
            let tracker = travelsync::WatermarkTracker::new(settings.retention, settings.timezone);
            let now = Utc::now();
            let cycle_end = tracker.cycle_end(now);

            let mut rows = Vec::new();
            for s in registry.all() {
                let tail = store.tail_timestamp(s)?;
                let next = tracker.next_window_start(&*store, s, now)?;
                rows.push(SeriesStatus {
                    id: s.id().to_string(),
                    name: s.name().to_string(),
                    tail: tail.map(|t| t.to_rfc3339()),
                    next_start: next.instant().to_rfc3339(),
                    pending_windows: travelsync::sync::window_count(next.instant(), cycle_end),
                    records: store.len(s)?,
                });
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                println!(
                    "{:<10} {:<30} {:<26} {:<26} {:>8} {:>9}",
                    "ID", "NAME", "TAIL", "NEXT START", "PENDING", "RECORDS"
                );
                for row in &rows {
                    println!(
                        "{:<10} {:<30} {:<26} {:<26} {:>8} {:>9}",
                        row.id,
                        row.name,
                        row.tail.as_deref().unwrap_or("-"),
                        row.next_start,
                        row.pending_windows,
                        row.records
                    );
                }
            }
        }

        Commands::Config { .. } => unreachable!("handled before config is loaded"),
    }

    Ok(())
}

fn init_tracing(config: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("travelsync={}", config.level).into());

    let registry = tracing_subscriber::registry().with(filter);
    if config.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

//! # Travelsync
//!
//! Incremental travel-time synchronization: keeps one 15-minute aggregate
//! table per route caught up with a remote sample source.
//!
//! ## Features
//!
//! - **Bounded fetches**: catch-up spans split into day-sized windows
//! - **Fixed grid**: samples averaged into 15-minute bins, zero readings ignored
//! - **Local calendar columns**: bins localized to a configured time zone
//! - **Bounded history**: tables pruned to a retention horizon after every append
//! - **Isolation**: one route's failure never stops the others
//!
//! ## Modules
//!
//! - [`sync`]: Planning, aggregation, watermarks and the cycle controller
//! - [`store`]: Series tables (CSV and in-memory)
//! - [`source`]: Sample sources (Acyclica datastream)
//! - [`series`]: Route registry
//! - [`config`]: TOML configuration with environment overrides
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use travelsync::{AcyclicaConfig, AcyclicaSource, CsvSyncStore, SeriesRegistry};
//! use travelsync::{SeriesSyncController, SyncSettings};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = SyncSettings::default();
//!     let registry = SeriesRegistry::load("routes.csv".as_ref())?;
//!
//!     let store = Arc::new(CsvSyncStore::new("./data", settings.timezone));
//!     let source = Arc::new(AcyclicaSource::new(AcyclicaConfig {
//!         base_url: "https://cr.acyclica.com/datastream/route/csv/time".into(),
//!         api_key: "KEY".into(),
//!         request_timeout_secs: 60,
//!     })?);
//!
//!     let controller = SeriesSyncController::new(store, source, settings);
//!     let summary = controller.sync_all(registry.all(), chrono::Utc::now()).await;
//!
//!     println!("{}", summary.completion_message());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod series;
pub mod source;
pub mod store;
pub mod sync;

// Re-export top-level types for convenience
pub use sync::{
    CycleOutcome, CycleState, Field, RawSample, Record, RunSummary, SampleAggregator,
    SeriesSyncController, SyncError, SyncReport, SyncSettings, TravelTime, Watermark,
    WatermarkTracker, WeekdayConvention, Window,
};

pub use store::{CsvSyncStore, MemoryStore, Retention, StoreError, StoreResult, SyncStore};

pub use source::{AcyclicaConfig, AcyclicaSource, FetchError, SampleSource};

pub use series::{RegistryError, Series, SeriesRegistry};

pub use config::{Config, ConfigError, LoggingConfig, SourceConfig, StorageConfig, SyncConfig};

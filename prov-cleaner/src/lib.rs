//! Provenance Cleaner - periodic archival job
//!
//! Drives [`prov_engine::ArchivalController::archive_round`] on an interval,
//! persisting the sweep cursor between rounds so every project index gets its
//! turn across restarts.
//!
//! ```ignore
//! use prov_cleaner::{cleaner_task, CleanerConfig, ProvenanceCleaner};
//! use tokio::sync::watch;
//!
//! let config = CleanerConfig::from_env();
//! let cleaner = Arc::new(ProvenanceCleaner::from_config(index, cold, projects, &config));
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! let handle = tokio::spawn(cleaner_task(cleaner, config, shutdown_rx));
//!
//! // On shutdown
//! let _ = shutdown_tx.send(true);
//! let metrics = handle.await?;
//! ```

pub mod config;
pub mod job;
pub mod telemetry;

pub use config::CleanerConfig;
pub use job::{cleaner_task, CleanerMetrics, CleanerSnapshot, ProvenanceCleaner, RunOutcome};
pub use telemetry::{init_tracing, LogFormat};

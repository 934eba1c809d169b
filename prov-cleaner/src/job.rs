//! Periodic archival job.
//!
//! Each round loads the sweep cursor, runs one bounded
//! [`ArchivalController::archive_round`] from it, and stores the index the
//! round stopped at. A failed round leaves the cursor untouched so the next
//! tick retries from the same place.

use crate::config::CleanerConfig;
use prov_core::{now_millis, ProvResult};
use prov_engine::{ArchivalController, ProjectResolver, Round};
use prov_storage::{ArchivalCursor, ColdStore, CursorStore, SearchIndex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

// ============================================================================
// METRICS
// ============================================================================

/// Counters over the lifetime of a cleaner task.
#[derive(Debug, Default)]
pub struct CleanerMetrics {
    /// Rounds that ran to completion
    pub rounds: AtomicU64,
    /// Operations moved to cold storage
    pub archived: AtomicU64,
    /// Orphan indices deleted
    pub cleaned: AtomicU64,
    /// Rounds that failed
    pub errors: AtomicU64,
    /// Ticks skipped because archiving is disabled
    pub skipped: AtomicU64,
}

impl CleanerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> CleanerSnapshot {
        CleanerSnapshot {
            rounds: self.rounds.load(Ordering::Relaxed),
            archived: self.archived.load(Ordering::Relaxed),
            cleaned: self.cleaned.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }

    fn record(&self, result: &ProvResult<RunOutcome>) {
        match result {
            Ok(RunOutcome::Skipped) => {
                self.skipped.fetch_add(1, Ordering::Relaxed);
            }
            Ok(RunOutcome::Completed { round, .. }) => {
                self.rounds.fetch_add(1, Ordering::Relaxed);
                self.archived.fetch_add(round.archived, Ordering::Relaxed);
                self.cleaned.fetch_add(round.cleaned, Ordering::Relaxed);
            }
            Err(_) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Metrics at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanerSnapshot {
    pub rounds: u64,
    pub archived: u64,
    pub cleaned: u64,
    pub errors: u64,
    pub skipped: u64,
}

// ============================================================================
// ROUNDS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// `archive_size` is 0, nothing was touched.
    Skipped,
    /// The round ran; `next` is the stored cursor, empty after a full sweep.
    Completed { round: Round, next: String },
}

/// Runs archive rounds against one controller and cursor store.
pub struct ProvenanceCleaner {
    controller: ArchivalController,
    cursors: Arc<dyn CursorStore>,
    log_rounds: bool,
}

impl ProvenanceCleaner {
    pub fn new(
        controller: ArchivalController,
        cursors: Arc<dyn CursorStore>,
        log_rounds: bool,
    ) -> Self {
        Self {
            controller,
            cursors,
            log_rounds,
        }
    }

    /// Cleaner whose controller runs with `config.engine` and whose cursor
    /// lives where `config.cursor_path` says.
    pub fn from_config(
        index: Arc<dyn SearchIndex>,
        cold: Arc<dyn ColdStore>,
        projects: Arc<dyn ProjectResolver>,
        config: &CleanerConfig,
    ) -> Self {
        let controller = ArchivalController::new(index, cold, projects, config.engine.clone());
        Self::new(controller, config.cursor_store(), config.log_rounds)
    }

    pub fn controller(&self) -> &ArchivalController {
        &self.controller
    }

    /// Run one round from the stored cursor.
    pub fn run_once(&self) -> ProvResult<RunOutcome> {
        let config = self.controller.config();
        if config.archive_size == 0 {
            tracing::debug!("Archiving disabled, skipping round");
            return Ok(RunOutcome::Skipped);
        }

        let cursor = self.cursors.load()?;
        let before_ts = now_millis() - config.archive_delay.as_millis() as i64;
        let (round, next) = self.controller.archive_round(
            &cursor.last_index_checked,
            config.cleanup_size,
            config.archive_size,
            before_ts,
        )?;
        self.cursors.save(&ArchivalCursor::new(next.clone()))?;

        if self.log_rounds {
            tracing::info!(
                from = %cursor.last_index_checked,
                next = %next,
                archived = round.archived,
                cleaned = round.cleaned,
                "Provenance cleaner round completed"
            );
        }
        Ok(RunOutcome::Completed { round, next })
    }
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Run rounds every `config.check_interval` until `shutdown_rx` turns true.
///
/// Budgets and the archive delay are those of the cleaner's controller;
/// only the interval is taken from `config`. Rounds run on the blocking pool
/// since the controller is synchronous.
///
/// ```ignore
/// let (shutdown_tx, shutdown_rx) = watch::channel(false);
/// let handle = tokio::spawn(cleaner_task(cleaner, config, shutdown_rx));
///
/// let _ = shutdown_tx.send(true);
/// let metrics = handle.await?;
/// println!("Archived {} operations", metrics.snapshot().archived);
/// ```
pub async fn cleaner_task(
    cleaner: Arc<ProvenanceCleaner>,
    config: CleanerConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<CleanerMetrics> {
    let metrics = Arc::new(CleanerMetrics::new());

    let mut round_interval = interval(config.check_interval);
    round_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let engine = cleaner.controller().config();
    tracing::info!(
        check_interval_secs = config.check_interval.as_secs(),
        archive_size = engine.archive_size,
        cleanup_size = engine.cleanup_size,
        archive_delay_secs = engine.archive_delay.as_secs(),
        "Provenance cleaner task started"
    );

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    tracing::info!("Provenance cleaner task shutting down");
                    break;
                }
            }

            _ = round_interval.tick() => {
                run_round(&cleaner, &metrics).await;
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        rounds = snapshot.rounds,
        archived = snapshot.archived,
        cleaned = snapshot.cleaned,
        errors = snapshot.errors,
        skipped = snapshot.skipped,
        "Provenance cleaner task completed"
    );

    metrics
}

async fn run_round(cleaner: &Arc<ProvenanceCleaner>, metrics: &CleanerMetrics) {
    let worker = cleaner.clone();
    match tokio::task::spawn_blocking(move || worker.run_once()).await {
        Ok(result) => {
            if let Err(e) = &result {
                tracing::error!(
                    error = %e,
                    retryable = e.is_retryable(),
                    "Provenance cleaner round failed"
                );
            }
            metrics.record(&result);
        }
        Err(e) => {
            tracing::error!(error = %e, "Provenance cleaner round panicked");
            metrics.errors.fetch_add(1, Ordering::Relaxed);
        }
    }
}

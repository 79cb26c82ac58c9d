//! Sync orchestration.
//!
//! One run walks the selected sources in registry order, sequentially:
//! read cursor, fetch since cursor, normalize, append, advance cursor,
//! pause for the source's rate limit. A per-source failure is recorded and
//! the loop moves on; only a failed destination open aborts the run. The
//! run honors an optional deadline and SIGINT/SIGTERM, after which no new
//! source is started and the summary is produced from what completed.

mod signal;

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use snafu::prelude::*;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::cursor::{CursorOrigin, CursorStore};
use crate::emit;
use crate::error::{ConfigSnafu, StoreSnafu, SyncError};
use crate::fetch::{Fetcher, HttpFetcher};
use crate::metrics::events::{
    CursorFallback, FetchCompleted, FetchDuration, RequestStatus, SourceProcessed, SourceStatus,
};
use crate::registry::Source;
use crate::sink::AppendSink;
use crate::store::{CsvWorkbook, TableStoreRef};

/// Outcome of processing one source.
#[derive(Debug, Clone)]
pub struct SourceOutcome {
    pub source: String,
    pub status: SourceStatus,
    pub rows_written: usize,
    /// Error or skip reason, for the summary.
    pub detail: Option<String>,
}

/// Statistics about a completed sync run.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    pub total_rows: usize,
    pub succeeded: usize,
    pub empty: usize,
    pub skipped: usize,
    pub failed: usize,
    pub duration_secs: f64,
    pub outcomes: Vec<SourceOutcome>,
    pub errors: Vec<String>,
}

impl SyncStats {
    /// The run-level success contract: at least one source succeeded.
    pub fn is_success(&self) -> bool {
        self.succeeded > 0
    }

    fn record(&mut self, outcome: SourceOutcome) {
        match outcome.status {
            SourceStatus::Success => {
                self.succeeded += 1;
                self.total_rows += outcome.rows_written;
            }
            SourceStatus::Empty => self.empty += 1,
            SourceStatus::Skipped => self.skipped += 1,
            SourceStatus::Failed => {
                self.failed += 1;
                if let Some(detail) = &outcome.detail {
                    self.errors.push(format!("{}: {}", outcome.source, detail));
                }
            }
        }
        self.outcomes.push(outcome);
    }
}

/// One sync run over a fixed source list.
pub struct SyncRun {
    sources: Vec<Source>,
    fetcher: Arc<dyn Fetcher>,
    cursors: CursorStore,
    sink: AppendSink,
    shutdown: CancellationToken,
    /// Batch id stamped on every row written this run.
    sync_id: String,
}

impl SyncRun {
    pub fn new(
        sources: Vec<Source>,
        fetcher: Arc<dyn Fetcher>,
        store: TableStoreRef,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            sources,
            fetcher,
            cursors: CursorStore::new(store.clone()),
            sink: AppendSink::new(store),
            shutdown,
            sync_id: format!("sync_{}", Uuid::new_v4().simple()),
        }
    }

    /// Process all sources sequentially and produce the run summary.
    pub async fn run(&self) -> SyncStats {
        let started = Instant::now();
        let mut stats = SyncStats::default();
        let total = self.sources.len();

        info!(sources = total, sync_id = %self.sync_id, "Starting sync run");

        for (index, source) in self.sources.iter().enumerate() {
            if self.shutdown.is_cancelled() {
                warn!(
                    remaining = total - index,
                    "Run cancelled, not starting remaining sources"
                );
                break;
            }

            info!(source = %source.name, "Processing source {}/{}", index + 1, total);
            let outcome = self.process_source(source).await;
            emit!(SourceProcessed {
                status: outcome.status
            });
            stats.record(outcome);

            // Respect the source's own request budget before moving on.
            if index + 1 < total {
                tokio::select! {
                    _ = self.shutdown.cancelled() => {}
                    _ = tokio::time::sleep(source.rate_limit()) => {}
                }
            }
        }

        stats.duration_secs = started.elapsed().as_secs_f64();
        self.log_summary(&stats);
        stats
    }

    /// Fetch, normalize, and append one source. Never propagates an error;
    /// every failure mode becomes an outcome.
    async fn process_source(&self, source: &Source) -> SourceOutcome {
        let Some(credentials) = source.resolve_credentials() else {
            let vars = source.credentials.referenced_vars().join(", ");
            warn!(source = %source.name, missing = %vars, "API credentials missing, skipping");
            return SourceOutcome {
                source: source.name.clone(),
                status: SourceStatus::Skipped,
                rows_written: 0,
                detail: Some(format!("credentials missing ({vars})")),
            };
        };

        let now = Utc::now();
        let cursor = self.cursors.get_cursor(source, now).await;
        if cursor.origin == CursorOrigin::FallbackAfterError {
            emit!(CursorFallback);
        }

        let fetch_started = Instant::now();
        let fetched = self
            .fetcher
            .fetch(source, &credentials, cursor.since, &self.sync_id)
            .await;
        emit!(FetchDuration {
            duration: fetch_started.elapsed()
        });

        let records = match fetched {
            Ok(records) => {
                emit!(FetchCompleted {
                    status: RequestStatus::Success
                });
                records
            }
            Err(error) => {
                emit!(FetchCompleted {
                    status: RequestStatus::Error
                });
                warn!(source = %source.name, %error, "Fetch failed");
                return SourceOutcome {
                    source: source.name.clone(),
                    status: SourceStatus::Failed,
                    rows_written: 0,
                    detail: Some(error.to_string()),
                };
            }
        };

        if records.is_empty() {
            info!(source = %source.name, "No new data");
            return SourceOutcome {
                source: source.name.clone(),
                status: SourceStatus::Empty,
                rows_written: 0,
                detail: None,
            };
        }

        if let Err(error) = self.sink.ensure_schema(&source.table, source.kind).await {
            warn!(source = %source.name, %error, "Could not prepare destination");
            return SourceOutcome {
                source: source.name.clone(),
                status: SourceStatus::Failed,
                rows_written: 0,
                detail: Some(error.to_string()),
            };
        }

        match self.sink.append(&source.table, &records).await {
            Ok(written) => {
                // The cursor only moves after a successful append, and only
                // forward, so a crash before this point re-fetches the window.
                if let Some(newest) = records.iter().map(|r| r.timestamp).max() {
                    self.cursors.advance_cursor(source, newest).await;
                }

                if written == 0 {
                    info!(source = %source.name, "All fetched rows already present");
                    SourceOutcome {
                        source: source.name.clone(),
                        status: SourceStatus::Empty,
                        rows_written: 0,
                        detail: None,
                    }
                } else {
                    info!(source = %source.name, rows = written, "Source synced");
                    SourceOutcome {
                        source: source.name.clone(),
                        status: SourceStatus::Success,
                        rows_written: written,
                        detail: None,
                    }
                }
            }
            Err(error) => {
                warn!(source = %source.name, %error, "Append failed");
                SourceOutcome {
                    source: source.name.clone(),
                    status: SourceStatus::Failed,
                    rows_written: 0,
                    detail: Some(error.to_string()),
                }
            }
        }
    }

    /// Per-source outcome lines plus run totals, so an operator can tell at
    /// a glance what succeeded, what was skipped, and why.
    fn log_summary(&self, stats: &SyncStats) {
        for outcome in &stats.outcomes {
            match &outcome.detail {
                Some(detail) => info!(
                    source = %outcome.source,
                    status = outcome.status.as_str(),
                    detail = %detail,
                    rows = outcome.rows_written,
                    "Source outcome"
                ),
                None => info!(
                    source = %outcome.source,
                    status = outcome.status.as_str(),
                    rows = outcome.rows_written,
                    "Source outcome"
                ),
            }
        }

        info!(
            duration_secs = stats.duration_secs,
            total_rows = stats.total_rows,
            succeeded = stats.succeeded,
            empty = stats.empty,
            skipped = stats.skipped,
            failed = stats.failed,
            "Sync run complete"
        );

        if !stats.errors.is_empty() {
            warn!(errors = ?stats.errors, "Some sources had errors");
        }
    }
}

/// Run a full sync from configuration.
///
/// Opening the destination is the only fatal step; per-source failures are
/// folded into the returned stats.
pub async fn run_sync(config: &Config) -> Result<SyncStats, SyncError> {
    let sources = config.select_sources().context(ConfigSnafu)?;
    let store: TableStoreRef =
        Arc::new(CsvWorkbook::open(&config.destination.path).context(StoreSnafu)?);
    let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(config.http.timeout()));

    let shutdown = CancellationToken::new();

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            signal::shutdown_signal().await;
            shutdown.cancel();
        }
    });

    if let Some(deadline) = config.run.deadline() {
        tokio::spawn({
            let shutdown = shutdown.clone();
            async move {
                tokio::time::sleep(deadline).await;
                warn!(deadline_secs = deadline.as_secs(), "Run deadline reached");
                shutdown.cancel();
            }
        });
    }

    let run = SyncRun::new(sources, fetcher, store, shutdown);
    Ok(run.run().await)
}

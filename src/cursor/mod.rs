//! Sync cursor tracking for incremental fetches.
//!
//! The cursor for a (source, destination) pair is derived by scanning the
//! destination table's timestamp column rather than kept in a separate
//! store, so a fresh process resumes exactly where the data left off. An
//! in-memory high-water mark guards monotonicity within a run: the cursor
//! never moves backwards, and only advances after a successful append.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{CursorError, CursorReadSnafu};
use crate::record::RecordKind;
use crate::registry::{default_lookback, overlap_window, Source};
use crate::store::TableStoreRef;

use snafu::prelude::*;

/// Where a cursor value came from, for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorOrigin {
    /// Resumed from the destination's newest row (minus the overlap window).
    Resumed,
    /// Destination empty; the kind's documented default lookback applies.
    DefaultLookback,
    /// Destination unreadable; fell back to the default lookback.
    FallbackAfterError,
    /// Resumed value was older than the upstream history limit and was
    /// clamped forward to it.
    Clamped,
}

/// A resolved incremental start point.
#[derive(Debug, Clone, Copy)]
pub struct CursorPoint {
    pub since: DateTime<Utc>,
    pub origin: CursorOrigin,
}

/// Derives and advances per-(source, destination) cursors.
pub struct CursorStore {
    store: TableStoreRef,
    /// High-water marks advanced after successful appends this run.
    advanced: Mutex<HashMap<(String, String), DateTime<Utc>>>,
}

impl CursorStore {
    pub fn new(store: TableStoreRef) -> Self {
        Self {
            store,
            advanced: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve the incremental start point for a source.
    ///
    /// Never fails: a cursor read error degrades to the default lookback
    /// with a warning, so one source's bad destination cannot abort a run.
    pub async fn get_cursor(&self, source: &Source, now: DateTime<Utc>) -> CursorPoint {
        let point = match self.scan_destination(source).await {
            Ok(Some(last_seen)) => {
                let since = last_seen - overlap_window();
                debug!(
                    source = %source.name,
                    table = %source.table,
                    %since,
                    "Resuming from destination high-water mark"
                );
                CursorPoint {
                    since,
                    origin: CursorOrigin::Resumed,
                }
            }
            Ok(None) => {
                let since = now - default_lookback(source.kind);
                debug!(
                    source = %source.name,
                    table = %source.table,
                    %since,
                    "No prior rows, using default lookback"
                );
                CursorPoint {
                    since,
                    origin: CursorOrigin::DefaultLookback,
                }
            }
            Err(error) => {
                let since = now - default_lookback(source.kind);
                warn!(
                    source = %source.name,
                    table = %source.table,
                    %error,
                    "Could not determine cursor, falling back to default lookback"
                );
                CursorPoint {
                    since,
                    origin: CursorOrigin::FallbackAfterError,
                }
            }
        };

        self.clamp_to_history_limit(source, point, now)
    }

    /// Advance the in-memory high-water mark after a successful append.
    ///
    /// Ignores timestamps older than the current mark, keeping the cursor
    /// monotonically non-decreasing.
    pub async fn advance_cursor(&self, source: &Source, timestamp: DateTime<Utc>) {
        let key = (source.name.clone(), source.table.clone());
        let mut advanced = self.advanced.lock().await;
        let entry = advanced.entry(key).or_insert(timestamp);
        if timestamp > *entry {
            *entry = timestamp;
        }
    }

    /// The in-memory mark for a source, if one was advanced this run.
    pub async fn current_mark(&self, source: &Source) -> Option<DateTime<Utc>> {
        let advanced = self.advanced.lock().await;
        advanced
            .get(&(source.name.clone(), source.table.clone()))
            .copied()
    }

    /// Scan the destination for the newest timestamp belonging to `source`.
    ///
    /// Returns `Ok(None)` when the table is missing or has no matching rows.
    async fn scan_destination(
        &self,
        source: &Source,
    ) -> Result<Option<DateTime<Utc>>, CursorError> {
        // Prefer the in-memory mark; it may be ahead of what a slow store
        // read would show and must not regress.
        if let Some(mark) = self.current_mark(source).await {
            return Ok(Some(mark));
        }

        if !self
            .store
            .table_exists(&source.table)
            .await
            .context(CursorReadSnafu {
                table: source.table.clone(),
            })?
        {
            return Ok(None);
        }

        let rows = self
            .store
            .read_rows(&source.table)
            .await
            .context(CursorReadSnafu {
                table: source.table.clone(),
            })?;

        // Row 0 is the header; the timestamp column is always first and the
        // source/account column second in every record kind.
        let newest = rows
            .iter()
            .skip(1)
            .filter(|row| row.get(1).map(String::as_str) == Some(source.name.as_str()))
            .filter_map(|row| row.first())
            .filter_map(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|ts| ts.with_timezone(&Utc))
            .max();

        Ok(newest)
    }

    /// Order and execution history endpoints reject windows older than their
    /// documented maximum; clamp the start point forward when needed.
    fn clamp_to_history_limit(
        &self,
        source: &Source,
        point: CursorPoint,
        now: DateTime<Utc>,
    ) -> CursorPoint {
        let limit = match source.kind {
            RecordKind::Order | RecordKind::Execution => default_lookback(source.kind),
            _ => return point,
        };
        let oldest_allowed = now - limit;
        if point.since < oldest_allowed {
            warn!(
                source = %source.name,
                requested = %point.since,
                clamped = %oldest_allowed,
                "Window exceeds upstream history limit, clamping"
            );
            CursorPoint {
                since: oldest_allowed,
                origin: CursorOrigin::Clamped,
            }
        } else {
            point
        }
    }
}

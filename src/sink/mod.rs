//! Idempotent append sink.
//!
//! Writes normalized records to the destination store in bounded batches,
//! creating the table schema on first use. Records with a natural key that
//! already appears in the destination's recent tail are dropped before
//! writing, which neutralizes the duplicates the cursor's overlap window
//! would otherwise produce. Kinds without a natural key (ticks, balances)
//! are at-least-once within the overlap window.

use std::collections::HashSet;
use std::time::Duration;

use snafu::prelude::*;
use tracing::{debug, info};

use crate::emit;
use crate::error::{BatchWriteSnafu, EnsureSchemaSnafu, RecordWidthSnafu, SinkError};
use crate::metrics::events::{BatchesWritten, RecordsWritten, RowsDeduplicated};
use crate::record::{Record, RecordKind};
use crate::store::TableStoreRef;

/// Practical batch limit of the destination API.
const BATCH_SIZE: usize = 100;

/// Pause between batches, respecting destination write rate limits.
const BATCH_PAUSE: Duration = Duration::from_millis(500);

/// How many trailing destination rows are scanned for duplicate keys.
const DEDUP_TAIL_ROWS: usize = 1000;

/// Column index holding the natural-key id for a record kind, if any.
fn natural_key_column(kind: RecordKind) -> Option<usize> {
    match kind {
        RecordKind::Order => Some(4),     // order_id
        RecordKind::Execution => Some(9), // trade_id
        RecordKind::MarketTick | RecordKind::Balance | RecordKind::Position => None,
    }
}

/// Appends normalized rows to destination tables.
pub struct AppendSink {
    store: TableStoreRef,
    batch_size: usize,
    batch_pause: Duration,
}

impl AppendSink {
    pub fn new(store: TableStoreRef) -> Self {
        Self {
            store,
            batch_size: BATCH_SIZE,
            batch_pause: BATCH_PAUSE,
        }
    }

    /// Shrink batching for tests.
    #[cfg(test)]
    pub fn with_batching(mut self, batch_size: usize, batch_pause: Duration) -> Self {
        self.batch_size = batch_size;
        self.batch_pause = batch_pause;
        self
    }

    /// Create the destination table with its canonical header if absent.
    ///
    /// Safe to call repeatedly: an existing table with a header is left
    /// untouched, an existing empty table just gets the header row.
    pub async fn ensure_schema(&self, table: &str, kind: RecordKind) -> Result<(), SinkError> {
        let exists = self
            .store
            .table_exists(table)
            .await
            .context(EnsureSchemaSnafu { table })?;

        if !exists {
            self.store
                .create_table(table)
                .await
                .context(EnsureSchemaSnafu { table })?;
            self.store
                .write_header(table, kind.columns())
                .await
                .context(EnsureSchemaSnafu { table })?;
            info!(table, kind = kind.as_str(), "Created destination table");
            return Ok(());
        }

        let rows = self
            .store
            .read_rows(table)
            .await
            .context(EnsureSchemaSnafu { table })?;
        if rows.is_empty() {
            self.store
                .write_header(table, kind.columns())
                .await
                .context(EnsureSchemaSnafu { table })?;
            info!(table, kind = kind.as_str(), "Wrote header to empty table");
        }
        Ok(())
    }

    /// Append records, returning the number of rows actually written.
    ///
    /// Records already present (by natural key) are silently dropped.
    pub async fn append(&self, table: &str, records: &[Record]) -> Result<usize, SinkError> {
        if records.is_empty() {
            return Ok(0);
        }

        for record in records {
            ensure!(
                record.matches_schema(),
                RecordWidthSnafu {
                    table,
                    got: record.cells.len(),
                    want: record.kind.width(),
                }
            );
        }

        let deduped = self.drop_existing(table, records).await?;
        let dropped = records.len() - deduped.len();
        if dropped > 0 {
            debug!(table, dropped, "Dropped rows already present in destination");
            emit!(RowsDeduplicated {
                count: dropped as u64
            });
        }
        if deduped.is_empty() {
            return Ok(0);
        }

        let rows: Vec<Vec<String>> = deduped.iter().map(|r| r.render()).collect();
        let mut written = 0;

        for (index, batch) in rows.chunks(self.batch_size).enumerate() {
            if index > 0 {
                tokio::time::sleep(self.batch_pause).await;
            }
            self.store
                .append_rows(table, batch)
                .await
                .context(BatchWriteSnafu { table })?;
            written += batch.len();
            emit!(BatchesWritten { count: 1 });
            debug!(table, written, total = rows.len(), "Saved batch");
        }

        emit!(RecordsWritten {
            count: written as u64
        });
        Ok(written)
    }

    /// Filter out records whose natural key already exists in the recent
    /// tail of the destination.
    async fn drop_existing<'a>(
        &self,
        table: &str,
        records: &'a [Record],
    ) -> Result<Vec<&'a Record>, SinkError> {
        let keyed: Vec<_> = records
            .iter()
            .filter(|r| r.natural_key.is_some())
            .collect();
        if keyed.is_empty() {
            return Ok(records.iter().collect());
        }

        let key_column = natural_key_column(records[0].kind);
        let existing: HashSet<String> = match key_column {
            None => HashSet::new(),
            Some(column) => {
                let rows = self
                    .store
                    .read_rows(table)
                    .await
                    .context(BatchWriteSnafu { table })?;
                rows.iter()
                    .skip(1)
                    .rev()
                    .take(DEDUP_TAIL_ROWS)
                    .filter_map(|row| {
                        let account = row.get(1)?;
                        let id = row.get(column)?;
                        (!id.is_empty()).then(|| format!("{account}:{id}"))
                    })
                    .collect()
            }
        };

        Ok(records
            .iter()
            .filter(|record| match &record.natural_key {
                Some(key) => !existing.contains(key),
                None => true,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Cell;
    use crate::store::{MemoryWorkbook, TableStore};
    use chrono::Utc;
    use std::sync::Arc;

    fn tick(symbol: &str) -> Record {
        let now = Utc::now();
        Record {
            kind: RecordKind::MarketTick,
            timestamp: now,
            natural_key: None,
            cells: vec![
                Cell::Text(now.to_rfc3339()),
                Cell::Text("TestSource".to_string()),
                Cell::Text(symbol.to_string()),
                Cell::Float(1.0),
                Cell::Float(0.0),
                Cell::Empty,
                Cell::Empty,
                Cell::Text("sync_t".to_string()),
                Cell::Text("{}".to_string()),
            ],
        }
    }

    fn order(id: &str) -> Record {
        let now = Utc::now();
        let mut cells = vec![Cell::Text(now.to_rfc3339()), Cell::Text("Acct".to_string())];
        cells.resize(RecordKind::Order.width(), Cell::Text(String::new()));
        cells[4] = Cell::Text(id.to_string());
        Record {
            kind: RecordKind::Order,
            timestamp: now,
            natural_key: Some(format!("Acct:{id}")),
            cells,
        }
    }

    #[tokio::test]
    async fn test_ensure_schema_idempotent() {
        let store = Arc::new(MemoryWorkbook::new());
        let sink = AppendSink::new(store.clone());

        sink.ensure_schema("Ticks", RecordKind::MarketTick)
            .await
            .unwrap();
        sink.ensure_schema("Ticks", RecordKind::MarketTick)
            .await
            .unwrap();

        let rows = store.read_rows("Ticks").await.unwrap();
        // Exactly one header row, not two.
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].len(), RecordKind::MarketTick.width());
        assert_eq!(rows[0][0], "timestamp");
    }

    #[tokio::test]
    async fn test_append_batches_and_counts() {
        let store = Arc::new(MemoryWorkbook::new());
        let sink = AppendSink::new(store.clone())
            .with_batching(2, Duration::from_millis(1));

        sink.ensure_schema("Ticks", RecordKind::MarketTick)
            .await
            .unwrap();
        let records: Vec<_> = (0..5).map(|i| tick(&format!("SYM{i}"))).collect();
        let written = sink.append("Ticks", &records).await.unwrap();

        assert_eq!(written, 5);
        assert_eq!(store.data_row_count("Ticks").await, 5);
    }

    #[tokio::test]
    async fn test_append_rejects_wrong_width() {
        let store = Arc::new(MemoryWorkbook::new());
        let sink = AppendSink::new(store);

        let mut bad = tick("BTCUSDT");
        bad.cells.pop();
        let err = sink.append("Ticks", &[bad]).await.unwrap_err();
        assert!(matches!(err, SinkError::RecordWidth { got: 8, want: 9, .. }));
    }

    #[tokio::test]
    async fn test_duplicate_natural_keys_dropped() {
        let store = Arc::new(MemoryWorkbook::new());
        let sink = AppendSink::new(store.clone());

        sink.ensure_schema("Orders", RecordKind::Order)
            .await
            .unwrap();
        let first = sink
            .append("Orders", &[order("o-1"), order("o-2")])
            .await
            .unwrap();
        assert_eq!(first, 2);

        // Second run re-fetches the overlap window: o-2 is a duplicate.
        let second = sink
            .append("Orders", &[order("o-2"), order("o-3")])
            .await
            .unwrap();
        assert_eq!(second, 1);
        assert_eq!(store.data_row_count("Orders").await, 3);
    }

    #[tokio::test]
    async fn test_rerun_with_no_new_data_writes_nothing() {
        let store = Arc::new(MemoryWorkbook::new());
        let sink = AppendSink::new(store.clone());

        sink.ensure_schema("Orders", RecordKind::Order)
            .await
            .unwrap();
        let batch = vec![order("o-1"), order("o-2")];
        assert_eq!(sink.append("Orders", &batch).await.unwrap(), 2);
        assert_eq!(sink.append("Orders", &batch).await.unwrap(), 0);
        assert_eq!(store.data_row_count("Orders").await, 2);
    }
}

//! In-memory workbook for tests.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::StoreError;

use super::TableStore;

/// A workbook held entirely in memory. Intended for tests; it can also be
/// told to fail all appends to exercise sink error paths.
#[derive(Debug, Default)]
pub struct MemoryWorkbook {
    tables: Mutex<HashMap<String, Vec<Vec<String>>>>,
    fail_appends: std::sync::atomic::AtomicBool,
}

impl MemoryWorkbook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `append_rows` fail with an IO error.
    pub fn fail_appends(&self, fail: bool) {
        self.fail_appends
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    /// Number of data rows (excluding header) in a table, 0 if absent.
    pub async fn data_row_count(&self, table: &str) -> usize {
        let tables = self.tables.lock().await;
        tables
            .get(table)
            .map(|rows| rows.len().saturating_sub(1))
            .unwrap_or(0)
    }
}

#[async_trait]
impl TableStore for MemoryWorkbook {
    async fn table_exists(&self, table: &str) -> Result<bool, StoreError> {
        Ok(self.tables.lock().await.contains_key(table))
    }

    async fn create_table(&self, table: &str) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        if tables.contains_key(table) {
            return Err(StoreError::Io {
                source: std::io::Error::new(std::io::ErrorKind::AlreadyExists, "table exists"),
                table: table.to_string(),
            });
        }
        tables.insert(table.to_string(), Vec::new());
        Ok(())
    }

    async fn write_header(&self, table: &str, columns: &[&str]) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let rows = tables
            .get_mut(table)
            .ok_or_else(|| StoreError::TableNotFound {
                table: table.to_string(),
            })?;
        rows.clear();
        rows.push(columns.iter().map(|c| c.to_string()).collect());
        Ok(())
    }

    async fn read_rows(&self, table: &str) -> Result<Vec<Vec<String>>, StoreError> {
        let tables = self.tables.lock().await;
        tables
            .get(table)
            .cloned()
            .ok_or_else(|| StoreError::TableNotFound {
                table: table.to_string(),
            })
    }

    async fn append_rows(&self, table: &str, rows: &[Vec<String>]) -> Result<(), StoreError> {
        if self.fail_appends.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(StoreError::Io {
                source: std::io::Error::new(std::io::ErrorKind::Other, "append disabled"),
                table: table.to_string(),
            });
        }

        let mut tables = self.tables.lock().await;
        let existing = tables
            .get_mut(table)
            .ok_or_else(|| StoreError::TableNotFound {
                table: table.to_string(),
            })?;

        if let Some(header) = existing.first() {
            let want = header.len();
            if let Some(bad) = rows.iter().find(|r| r.len() != want) {
                return Err(StoreError::WidthMismatch {
                    table: table.to_string(),
                    got: bad.len(),
                    want,
                });
            }
        }

        existing.extend(rows.iter().cloned());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_roundtrip() {
        let workbook = MemoryWorkbook::new();
        workbook.create_table("T").await.unwrap();
        workbook.write_header("T", &["a", "b"]).await.unwrap();
        workbook
            .append_rows("T", &[vec!["1".to_string(), "2".to_string()]])
            .await
            .unwrap();

        let rows = workbook.read_rows("T").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(workbook.data_row_count("T").await, 1);
    }

    #[tokio::test]
    async fn test_fail_appends_toggle() {
        let workbook = MemoryWorkbook::new();
        workbook.create_table("T").await.unwrap();
        workbook.write_header("T", &["a"]).await.unwrap();

        workbook.fail_appends(true);
        assert!(workbook
            .append_rows("T", &[vec!["x".to_string()]])
            .await
            .is_err());

        workbook.fail_appends(false);
        assert!(workbook
            .append_rows("T", &[vec!["x".to_string()]])
            .await
            .is_ok());
    }
}

//! CSV-file-backed workbook.
//!
//! One CSV file per table under a base directory. This is the local
//! rendition of the spreadsheet-backed store the sync feeds: row 1 is the
//! header, everything below is data, appends go at the end.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use snafu::prelude::*;
use tracing::debug;

use crate::error::{CsvSnafu, IoSnafu, StoreError, TableNotFoundSnafu, WidthMismatchSnafu};

use super::TableStore;

/// A directory of CSV files, one per table.
#[derive(Debug, Clone)]
pub struct CsvWorkbook {
    base: PathBuf,
}

impl CsvWorkbook {
    /// Open a workbook rooted at `base`, creating the directory if needed.
    pub fn open(base: impl AsRef<Path>) -> Result<Self, StoreError> {
        let base = base.as_ref().to_path_buf();
        std::fs::create_dir_all(&base).context(IoSnafu {
            table: base.display().to_string(),
        })?;
        Ok(Self { base })
    }

    fn table_path(&self, table: &str) -> PathBuf {
        // Table names come from the registry, but keep path traversal out.
        let safe: String = table
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect();
        self.base.join(format!("{safe}.csv"))
    }

    fn header_width(&self, table: &str) -> Result<Option<usize>, StoreError> {
        let path = self.table_path(table);
        if !path.exists() {
            return TableNotFoundSnafu { table }.fail();
        }
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(&path)
            .context(CsvSnafu { table })?;
        let mut first = csv::StringRecord::new();
        let has_row = reader.read_record(&mut first).context(CsvSnafu { table })?;
        Ok(has_row.then(|| first.len()))
    }
}

#[async_trait]
impl TableStore for CsvWorkbook {
    async fn table_exists(&self, table: &str) -> Result<bool, StoreError> {
        Ok(self.table_path(table).exists())
    }

    async fn create_table(&self, table: &str) -> Result<(), StoreError> {
        let path = self.table_path(table);
        std::fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&path)
            .context(IoSnafu { table })?;
        debug!(table, path = %path.display(), "Created table");
        Ok(())
    }

    async fn write_header(&self, table: &str, columns: &[&str]) -> Result<(), StoreError> {
        let path = self.table_path(table);
        if !path.exists() {
            return TableNotFoundSnafu { table }.fail();
        }
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(&path)
            .context(CsvSnafu { table })?;
        writer.write_record(columns).context(CsvSnafu { table })?;
        writer.flush().context(IoSnafu { table })?;
        Ok(())
    }

    async fn read_rows(&self, table: &str) -> Result<Vec<Vec<String>>, StoreError> {
        let path = self.table_path(table);
        if !path.exists() {
            return TableNotFoundSnafu { table }.fail();
        }
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(&path)
            .context(CsvSnafu { table })?;

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.context(CsvSnafu { table })?;
            rows.push(record.iter().map(str::to_string).collect());
        }
        Ok(rows)
    }

    async fn append_rows(&self, table: &str, rows: &[Vec<String>]) -> Result<(), StoreError> {
        if rows.is_empty() {
            return Ok(());
        }

        let want = self.header_width(table)?.unwrap_or(rows[0].len());
        if let Some(bad) = rows.iter().find(|r| r.len() != want) {
            return WidthMismatchSnafu {
                table,
                got: bad.len(),
                want,
            }
            .fail();
        }

        let path = self.table_path(table);
        let file = std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .context(IoSnafu { table })?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        for row in rows {
            writer.write_record(row).context(CsvSnafu { table })?;
        }
        writer.flush().context(IoSnafu { table })?;
        debug!(table, rows = rows.len(), "Appended rows");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_create_header_append_read() {
        let dir = TempDir::new().unwrap();
        let workbook = CsvWorkbook::open(dir.path()).unwrap();

        assert!(!workbook.table_exists("Ticks").await.unwrap());
        workbook.create_table("Ticks").await.unwrap();
        workbook
            .write_header("Ticks", &["timestamp", "symbol", "price"])
            .await
            .unwrap();
        workbook
            .append_rows(
                "Ticks",
                &[vec![
                    "2026-08-07T00:00:00Z".to_string(),
                    "BTCUSDT".to_string(),
                    "65000.5".to_string(),
                ]],
            )
            .await
            .unwrap();

        let rows = workbook.read_rows("Ticks").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], vec!["timestamp", "symbol", "price"]);
        assert_eq!(rows[1][1], "BTCUSDT");
    }

    #[tokio::test]
    async fn test_create_existing_table_fails() {
        let dir = TempDir::new().unwrap();
        let workbook = CsvWorkbook::open(dir.path()).unwrap();

        workbook.create_table("Orders").await.unwrap();
        assert!(workbook.create_table("Orders").await.is_err());
    }

    #[tokio::test]
    async fn test_append_rejects_width_mismatch() {
        let dir = TempDir::new().unwrap();
        let workbook = CsvWorkbook::open(dir.path()).unwrap();

        workbook.create_table("Ticks").await.unwrap();
        workbook.write_header("Ticks", &["a", "b"]).await.unwrap();

        let err = workbook
            .append_rows("Ticks", &[vec!["only-one".to_string()]])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::WidthMismatch { got: 1, want: 2, .. }));
    }

    #[tokio::test]
    async fn test_read_missing_table_is_not_found() {
        let dir = TempDir::new().unwrap();
        let workbook = CsvWorkbook::open(dir.path()).unwrap();
        let err = workbook.read_rows("Nope").await.unwrap_err();
        assert!(matches!(err, StoreError::TableNotFound { .. }));
    }

    #[tokio::test]
    async fn test_table_name_sanitized() {
        let dir = TempDir::new().unwrap();
        let workbook = CsvWorkbook::open(dir.path()).unwrap();
        workbook.create_table("../escape").await.unwrap();
        assert!(dir.path().join("___escape.csv").exists());
    }
}

//! Tabular destination store abstraction.
//!
//! The sync core only needs four operations from its destination: create a
//! table, write a header row, read all rows, append rows. Everything about
//! the concrete backend (a spreadsheet API, a directory of CSV files, an
//! in-memory map for tests) stays behind [`TableStore`].

mod csv_workbook;
mod memory;

pub use csv_workbook::CsvWorkbook;
pub use memory::MemoryWorkbook;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StoreError;

/// A reference-counted table store.
pub type TableStoreRef = Arc<dyn TableStore>;

/// Append-only tabular storage addressed by table name.
#[async_trait]
pub trait TableStore: Send + Sync {
    /// True if the table already exists.
    async fn table_exists(&self, table: &str) -> Result<bool, StoreError>;

    /// Create an empty table. Fails if it already exists.
    async fn create_table(&self, table: &str) -> Result<(), StoreError>;

    /// Write the header row. The table must exist and be empty.
    async fn write_header(&self, table: &str, columns: &[&str]) -> Result<(), StoreError>;

    /// Read every row including the header. Missing table is an error.
    async fn read_rows(&self, table: &str) -> Result<Vec<Vec<String>>, StoreError>;

    /// Append rows after the existing content. Rows must match the header
    /// width; implementations reject mismatched rows.
    async fn append_rows(&self, table: &str, rows: &[Vec<String>]) -> Result<(), StoreError>;
}

//! tradesync: incremental multi-source market data synchronization.
//!
//! This library polls exchange and market-data APIs (Bybit, Blofin,
//! CoinGecko), normalizes the responses into canonical rows, and appends
//! them idempotently to a tabular destination store, resuming from the
//! newest previously-written timestamp per source.
//!
//! # Example
//!
//! ```ignore
//! use tradesync::{run_sync, Config, error::SyncError};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), SyncError> {
//!     let config = Config::from_file("tradesync.yaml")?;
//!     let stats = run_sync(&config).await?;
//!     println!("Wrote {} rows", stats.total_rows);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod cursor;
pub mod error;
pub mod fetch;
pub mod metrics;
pub mod pipeline;
pub mod record;
pub mod registry;
pub mod sink;
pub mod store;

// Re-export main types
pub use config::Config;
pub use pipeline::{run_sync, SyncRun, SyncStats};
pub use store::{TableStore, TableStoreRef};

//! Error types for tradesync using snafu.
//!
//! Only `ConfigError` (and a failed destination open) terminates a run
//! abnormally. Everything else is recovered at the per-source boundary and
//! surfaced through the end-of-run summary.

use snafu::prelude::*;

// ============ Config Errors ============

/// Errors that can occur during configuration parsing and validation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Destination path is empty.
    #[snafu(display("Destination path cannot be empty"))]
    EmptyDestinationPath,

    /// No sources configured or selected.
    #[snafu(display("No sources to sync (empty registry selection)"))]
    NoSources,

    /// A selected source name does not exist in the registry.
    #[snafu(display("Unknown source in selection: {name}"))]
    UnknownSource { name: String },

    /// Environment variable interpolation failed.
    #[snafu(display("Environment variable interpolation failed:\n{message}"))]
    EnvInterpolation { message: String },

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML configuration"))]
    YamlParse { source: serde_yaml::Error },

    /// Failed to read configuration file.
    #[snafu(display("Failed to read configuration file"))]
    ReadFile { source: std::io::Error },
}

// ============ Store Errors ============

/// Errors from the tabular destination store.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StoreError {
    /// Table does not exist.
    #[snafu(display("Table not found: {table}"))]
    TableNotFound { table: String },

    /// IO error during store operations.
    #[snafu(display("Store IO error for {table}"))]
    Io {
        source: std::io::Error,
        table: String,
    },

    /// CSV encoding/decoding failed.
    #[snafu(display("CSV error for {table}"))]
    Csv { source: csv::Error, table: String },

    /// A row's cell count does not match the table header.
    #[snafu(display("Row width {got} does not match schema width {want} for {table}"))]
    WidthMismatch {
        table: String,
        got: usize,
        want: usize,
    },
}

// ============ Fetch Errors ============

/// Errors that can occur while fetching from an upstream API.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum FetchError {
    /// The HTTP request itself failed (connect, timeout, TLS).
    #[snafu(display("Request to {source_name} failed"))]
    Request {
        source: reqwest::Error,
        source_name: String,
    },

    /// Upstream returned a non-success HTTP status.
    #[snafu(display("{source_name} returned HTTP {status}: {body}"))]
    UpstreamStatus {
        source_name: String,
        status: u16,
        body: String,
    },

    /// Upstream returned a success status but an error envelope.
    #[snafu(display("{source_name} API error {code}: {message}"))]
    UpstreamEnvelope {
        source_name: String,
        code: i64,
        message: String,
    },

    /// Response body was not the expected JSON shape.
    #[snafu(display("Unexpected response shape from {source_name}: {message}"))]
    UnexpectedShape {
        source_name: String,
        message: String,
    },

    /// Signing material was malformed (e.g. empty secret).
    #[snafu(display("Could not sign request for {source_name}: {message}"))]
    Signing {
        source_name: String,
        message: String,
    },

    /// Endpoint template produced an invalid URL.
    #[snafu(display("Invalid endpoint URL for {source_name}"))]
    InvalidEndpoint {
        source: url::ParseError,
        source_name: String,
    },
}

// ============ Cursor Errors ============

/// Errors while determining the incremental start point.
///
/// These are always recovered by falling back to the source's default
/// lookback window; they exist so the fallback can be logged with a cause.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CursorError {
    /// Could not read the destination table.
    #[snafu(display("Could not read destination {table}"))]
    CursorRead { source: StoreError, table: String },
}

// ============ Sink Errors ============

/// Errors while appending normalized rows to the destination.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SinkError {
    /// A batch write failed.
    #[snafu(display("Failed to write batch to {table}"))]
    BatchWrite { source: StoreError, table: String },

    /// Creating the table or header failed.
    #[snafu(display("Failed to ensure schema for {table}"))]
    EnsureSchema { source: StoreError, table: String },

    /// A record's width does not match the destination schema.
    #[snafu(display("Record width {got} does not match {table} schema width {want}"))]
    RecordWidth {
        table: String,
        got: usize,
        want: usize,
    },
}

// ============ Metrics Errors ============

/// Errors that can occur during metrics initialization.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MetricsError {
    /// Failed to initialize Prometheus recorder.
    #[snafu(display("Failed to initialize Prometheus recorder"))]
    PrometheusInit {
        source: metrics_exporter_prometheus::BuildError,
    },
}

// ============ Sync Error (top-level) ============

/// Top-level errors that aggregate all error types.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SyncError {
    /// Configuration error.
    #[snafu(display("Configuration error"))]
    Config { source: ConfigError },

    /// Destination workbook could not be opened.
    #[snafu(display("Destination store error"))]
    Store { source: StoreError },

    /// Address parsing error for the metrics endpoint.
    #[snafu(display("Failed to parse metrics address"))]
    AddressParse { source: std::net::AddrParseError },

    /// Metrics error.
    #[snafu(display("Metrics error"))]
    Metrics { source: MetricsError },

    /// Every processed source failed or was skipped.
    #[snafu(display("No source succeeded ({failed} failed, {skipped} skipped)"))]
    NoSourceSucceeded { failed: usize, skipped: usize },
}

//! Configuration loading and validation.
//!
//! Configuration is YAML with environment variable interpolation for the
//! destination settings. Source credentials are NOT interpolated here: the
//! registry holds env var *names*, resolved per source at sync time, so a
//! missing API key skips one source instead of failing config loading.

mod vars;

use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::path::Path;
use std::time::Duration;

use crate::error::{
    ConfigError, EmptyDestinationPathSnafu, EnvInterpolationSnafu, NoSourcesSnafu, ReadFileSnafu,
    UnknownSourceSnafu, YamlParseSnafu,
};
use crate::registry::{self, Source};

/// Main configuration for one sync run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub destination: DestinationConfig,
    /// Names of registry sources to run, in registry order.
    /// Empty means the full built-in set.
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Destination workbook settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationConfig {
    /// Directory holding the destination tables (one CSV file per table).
    pub path: String,
}

/// Outbound HTTP settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Run-level settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunConfig {
    /// Overall deadline in seconds. Once exceeded no new source is started;
    /// the run proceeds to its summary. Unset means no deadline.
    #[serde(default)]
    pub deadline_secs: Option<u64>,
}

impl RunConfig {
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }
}

/// Metrics endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether to expose the Prometheus endpoint (default: false for a
    /// one-shot job; enable when running under a scheduler that scrapes).
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: default_metrics_address(),
        }
    }
}

fn default_metrics_address() -> String {
    "0.0.0.0:9090".to_string()
}

impl Config {
    /// Load configuration from a YAML file with env interpolation.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).context(ReadFileSnafu)?;

        let content = vars::interpolate(&content).map_err(|errors| {
            EnvInterpolationSnafu {
                message: errors.join("\n"),
            }
            .build()
        })?;

        let config: Config = serde_yaml::from_str(&content).context(YamlParseSnafu)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure!(!self.destination.path.is_empty(), EmptyDestinationPathSnafu);
        // Surface unknown source names at load time, not mid-run.
        self.select_sources().map(|_| ())
    }

    /// Resolve the configured selection against the registry.
    pub fn select_sources(&self) -> Result<Vec<Source>, ConfigError> {
        let all = registry::builtin();
        if self.sources.is_empty() {
            return Ok(all);
        }

        for name in &self.sources {
            ensure!(
                all.iter().any(|s| &s.name == name),
                UnknownSourceSnafu { name: name.clone() }
            );
        }

        let selected: Vec<Source> = all
            .into_iter()
            .filter(|s| self.sources.contains(&s.name))
            .collect();
        ensure!(!selected.is_empty(), NoSourcesSnafu);
        Ok(selected)
    }
}

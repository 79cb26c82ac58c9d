//! Fetch-normalize pipeline.
//!
//! One authenticated HTTP GET per source, parsed and mapped into canonical
//! records. The [`Fetcher`] trait is the seam between orchestration and the
//! network: production uses [`HttpFetcher`], tests substitute stubs.

pub mod auth;
pub mod normalize;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use snafu::prelude::*;
use tracing::debug;
use url::Url;

use crate::error::{FetchError, InvalidEndpointSnafu, RequestSnafu, UpstreamStatusSnafu};
use crate::record::Record;
use crate::registry::{Credentials, Source, TimeFilter};

/// Maximum response-body excerpt captured into an error.
const ERROR_BODY_LIMIT: usize = 500;

/// Fetches records from one source since a cursor timestamp.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(
        &self,
        source: &Source,
        credentials: &Credentials,
        since: DateTime<Utc>,
        sync_id: &str,
    ) -> Result<Vec<Record>, FetchError>;
}

/// Production fetcher on reqwest. Every request carries a timeout; the
/// upstream copies that omitted one could hang a whole run on one source.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("tradesync/0.1")
            .build()
            .expect("reqwest client construction cannot fail with static options");
        Self { client }
    }

    /// Build the request URL, applying the cursor bound where the upstream
    /// supports time filtering.
    fn build_url(
        source: &Source,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Url, FetchError> {
        let mut url = Url::parse(&source.endpoint).context(InvalidEndpointSnafu {
            source_name: source.name.clone(),
        })?;

        match source.time_filter {
            TimeFilter::None => {}
            TimeFilter::StartEndMillis => {
                url.query_pairs_mut()
                    .append_pair("startTime", &since.timestamp_millis().to_string())
                    .append_pair("endTime", &now.timestamp_millis().to_string());
            }
            TimeFilter::AfterSeconds => {
                url.query_pairs_mut()
                    .append_pair("after", &since.timestamp().to_string());
            }
        }

        Ok(url)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(
        &self,
        source: &Source,
        credentials: &Credentials,
        since: DateTime<Utc>,
        sync_id: &str,
    ) -> Result<Vec<Record>, FetchError> {
        let now = Utc::now();
        let url = Self::build_url(source, since, now)?;

        let mut request = self
            .client
            .get(url.clone())
            .header("Accept", "application/json");
        for (name, value) in auth::build_headers(source, credentials, &url, now)? {
            request = request.header(name, value);
        }

        debug!(source = %source.name, %url, "Fetching");
        let response = request.send().await.context(RequestSnafu {
            source_name: source.name.clone(),
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let excerpt: String = body.chars().take(ERROR_BODY_LIMIT).collect();
            return UpstreamStatusSnafu {
                source_name: source.name.clone(),
                status: status.as_u16(),
                body: excerpt,
            }
            .fail();
        }

        let body: serde_json::Value = response.json().await.context(RequestSnafu {
            source_name: source.name.clone(),
        })?;

        normalize::normalize(source, &body, sync_id, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry;

    fn source_named(name: &str) -> Source {
        registry::builtin()
            .into_iter()
            .find(|s| s.name == name)
            .unwrap()
    }

    #[test]
    fn test_url_untouched_for_snapshot_sources() {
        let source = source_named("CoinGecko");
        let now = Utc::now();
        let url = HttpFetcher::build_url(&source, now - chrono::Duration::hours(1), now).unwrap();
        assert_eq!(url.as_str(), source.endpoint);
    }

    #[test]
    fn test_start_end_millis_appended() {
        let source = source_named("Bybit Orders");
        let now = Utc::now();
        let since = now - chrono::Duration::hours(2);

        let url = HttpFetcher::build_url(&source, since, now).unwrap();
        let query = url.query().unwrap();
        assert!(query.contains("category=linear"));
        assert!(query.contains(&format!("startTime={}", since.timestamp_millis())));
        assert!(query.contains(&format!("endTime={}", now.timestamp_millis())));
    }

    #[test]
    fn test_after_seconds_appended() {
        let source = source_named("Blofin Orders");
        let now = Utc::now();
        let since = now - chrono::Duration::hours(2);

        let url = HttpFetcher::build_url(&source, since, now).unwrap();
        assert!(url
            .query()
            .unwrap()
            .contains(&format!("after={}", since.timestamp())));
    }
}

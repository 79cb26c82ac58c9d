//! Static source registry.
//!
//! Each [`Source`] fully describes one upstream API: endpoint, auth scheme,
//! credential references, rate-limit interval, response shape, and the
//! destination table it feeds. The registry is purely descriptive; the
//! orchestration loop never special-cases a source. Adding an exchange
//! means adding one entry here and one normalizer arm in `fetch::normalize`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::record::RecordKind;

/// Default lookback window when a destination has no prior rows.
///
/// One documented value per record kind; the upstream copies this replaces
/// disagreed (1 day vs 2 hours vs 24 hours vs a fixed epoch).
pub fn default_lookback(kind: RecordKind) -> chrono::Duration {
    match kind {
        RecordKind::MarketTick => chrono::Duration::hours(24),
        RecordKind::Balance => chrono::Duration::hours(24),
        // Order/execution history endpoints reject windows older than 7 days.
        RecordKind::Order => chrono::Duration::days(7),
        RecordKind::Execution => chrono::Duration::days(7),
        RecordKind::Position => chrono::Duration::days(1),
    }
}

/// Safety overlap subtracted from the last-seen timestamp, tolerating clock
/// skew and late-arriving records at the source.
pub fn overlap_window() -> chrono::Duration {
    chrono::Duration::minutes(5)
}

/// How a source authenticates requests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "scheme", rename_all = "snake_case")]
pub enum AuthScheme {
    /// Public endpoint, no extra headers.
    None,
    /// One static header carrying the API key.
    ApiKeyHeader { header: String },
    /// Keyed HMAC-SHA256 signature over a canonical string.
    HmacSigned { convention: SigningConvention },
}

/// The canonical-string convention for HMAC-signed sources.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SigningConvention {
    /// hex(HMAC(secret, timestamp + api_key + recv_window + query_string)),
    /// sent as `X-BAPI-*` headers (Bybit v5).
    QueryString,
    /// base64(HMAC(secret, timestamp + METHOD + request_path + body)),
    /// sent as `BF-ACCESS-*` headers, with a passphrase header (Blofin).
    PathAndBody,
}

/// How a time-range lower bound is passed to the upstream, if at all.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TimeFilter {
    /// Snapshot endpoint; the cursor bound is ignored.
    #[default]
    None,
    /// `startTime`/`endTime` query params in epoch milliseconds.
    StartEndMillis,
    /// `after` query param in epoch seconds.
    AfterSeconds,
}

/// The JSON envelope a source's response arrives in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResponseShape {
    /// `{retCode, retMsg, result: {list: [...]}}`
    ResultList,
    /// `{retCode, retMsg, result: {list: [{coin: [...]}]}}`
    WalletCoinList,
    /// `{code, msg, data: [...]}`
    DataArray,
    /// Flat keyed object: `{bitcoin: {usd: ..., ...}, ...}`
    KeyedObject,
}

/// Environment variable names holding a source's credentials.
///
/// Resolved at runtime per source; a missing variable makes the orchestrator
/// skip the source with a warning rather than fail the run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialRefs {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_secret: Option<String>,
    #[serde(default)]
    pub passphrase: Option<String>,
}

impl CredentialRefs {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn key(var: &str) -> Self {
        Self {
            api_key: Some(var.to_string()),
            ..Self::default()
        }
    }

    pub fn key_secret(key: &str, secret: &str) -> Self {
        Self {
            api_key: Some(key.to_string()),
            api_secret: Some(secret.to_string()),
            passphrase: None,
        }
    }

    pub fn key_secret_passphrase(key: &str, secret: &str, passphrase: &str) -> Self {
        Self {
            api_key: Some(key.to_string()),
            api_secret: Some(secret.to_string()),
            passphrase: Some(passphrase.to_string()),
        }
    }

    /// Env var names referenced by this source, in declaration order.
    pub fn referenced_vars(&self) -> Vec<&str> {
        [&self.api_key, &self.api_secret, &self.passphrase]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .collect()
    }
}

/// Resolved credential values, loaded from the environment per run.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub passphrase: Option<String>,
}

/// Static description of one upstream data source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    /// Unique name, also the `source`/`account` column value.
    pub name: String,
    /// Record kind produced by this source.
    pub kind: RecordKind,
    /// Full endpoint URL including static query parameters.
    pub endpoint: String,
    pub auth: AuthScheme,
    #[serde(default)]
    pub credentials: CredentialRefs,
    /// Pause after this source completes, respecting its request budget.
    #[serde(default = "default_rate_limit_ms")]
    pub rate_limit_ms: u64,
    pub shape: ResponseShape,
    #[serde(default)]
    pub time_filter: TimeFilter,
    /// Destination table name.
    pub table: String,
    /// Optional symbol allowlist applied during normalization.
    #[serde(default)]
    pub symbol_filter: Vec<String>,
}

fn default_rate_limit_ms() -> u64 {
    1000
}

impl Source {
    /// Rate-limit pause as a [`Duration`].
    pub fn rate_limit(&self) -> Duration {
        Duration::from_millis(self.rate_limit_ms)
    }

    /// True if the source declares at least one credential reference.
    pub fn requires_credentials(&self) -> bool {
        !self.credentials.referenced_vars().is_empty()
    }

    /// Resolve credential references from the environment.
    ///
    /// Returns `None` (skip this source) if any referenced variable is
    /// unset or empty.
    pub fn resolve_credentials(&self) -> Option<Credentials> {
        let lookup = |var: &Option<String>| -> Result<Option<String>, ()> {
            match var {
                None => Ok(None),
                Some(name) => match std::env::var(name) {
                    Ok(v) if !v.is_empty() => Ok(Some(v)),
                    _ => Err(()),
                },
            }
        };

        Some(Credentials {
            api_key: lookup(&self.credentials.api_key).ok()?,
            api_secret: lookup(&self.credentials.api_secret).ok()?,
            passphrase: lookup(&self.credentials.passphrase).ok()?,
        })
    }
}

/// The built-in source set, in processing order.
///
/// Public market-data endpoints first (cheap, no credentials), then the
/// account-scoped history endpoints.
pub fn builtin() -> Vec<Source> {
    vec![
        Source {
            name: "CoinGecko".to_string(),
            kind: RecordKind::MarketTick,
            endpoint: "https://api.coingecko.com/api/v3/simple/price\
                       ?ids=bitcoin,ethereum,cardano,solana&vs_currencies=usd\
                       &include_24hr_change=true&include_market_cap=true"
                .to_string(),
            auth: AuthScheme::None,
            credentials: CredentialRefs::none(),
            rate_limit_ms: 1000,
            shape: ResponseShape::KeyedObject,
            time_filter: TimeFilter::None,
            table: "TradingData".to_string(),
            symbol_filter: Vec::new(),
        },
        Source {
            name: "Bybit".to_string(),
            kind: RecordKind::MarketTick,
            endpoint:
                "https://api.bybit.com/v5/market/tickers?category=spot&symbol=BTCUSDT,ETHUSDT,ADAUSDT,SOLUSDT"
                    .to_string(),
            auth: AuthScheme::ApiKeyHeader {
                header: "X-BAPI-API-KEY".to_string(),
            },
            credentials: CredentialRefs::key("BYBIT_API_KEY"),
            rate_limit_ms: 1000,
            shape: ResponseShape::ResultList,
            time_filter: TimeFilter::None,
            table: "TradingData".to_string(),
            symbol_filter: Vec::new(),
        },
        Source {
            name: "Blofin".to_string(),
            kind: RecordKind::MarketTick,
            endpoint: "https://openapi.blofin.com/api/v1/market/tickers".to_string(),
            auth: AuthScheme::ApiKeyHeader {
                header: "BF-ACCESS-KEY".to_string(),
            },
            credentials: CredentialRefs::key("BLOFIN_API_KEY"),
            rate_limit_ms: 2000,
            shape: ResponseShape::DataArray,
            time_filter: TimeFilter::None,
            table: "TradingData".to_string(),
            symbol_filter: vec![
                "BTC-USDT".to_string(),
                "ETH-USDT".to_string(),
                "ADA-USDT".to_string(),
                "SOL-USDT".to_string(),
                "LINK-USDT".to_string(),
            ],
        },
        Source {
            name: "Bybit Wallet".to_string(),
            kind: RecordKind::Balance,
            endpoint: "https://api.bybit.com/v5/account/wallet-balance?accountType=UNIFIED"
                .to_string(),
            auth: AuthScheme::HmacSigned {
                convention: SigningConvention::QueryString,
            },
            credentials: CredentialRefs::key_secret("BYBIT_API_KEY", "BYBIT_API_SECRET"),
            rate_limit_ms: 1500,
            shape: ResponseShape::WalletCoinList,
            time_filter: TimeFilter::None,
            table: "Bybit_Balances".to_string(),
            symbol_filter: Vec::new(),
        },
        Source {
            name: "Bybit Orders".to_string(),
            kind: RecordKind::Order,
            endpoint: "https://api.bybit.com/v5/order/history?category=linear&limit=200"
                .to_string(),
            auth: AuthScheme::HmacSigned {
                convention: SigningConvention::QueryString,
            },
            credentials: CredentialRefs::key_secret("BYBIT_API_KEY", "BYBIT_API_SECRET"),
            rate_limit_ms: 3000,
            shape: ResponseShape::ResultList,
            time_filter: TimeFilter::StartEndMillis,
            table: "Bybit_Orders".to_string(),
            symbol_filter: Vec::new(),
        },
        Source {
            name: "Blofin Orders".to_string(),
            kind: RecordKind::Order,
            endpoint: "https://openapi.blofin.com/api/v1/trade/orders-history?limit=100"
                .to_string(),
            auth: AuthScheme::HmacSigned {
                convention: SigningConvention::PathAndBody,
            },
            credentials: CredentialRefs::key_secret_passphrase(
                "BLOFIN_API_KEY",
                "BLOFIN_API_SECRET",
                "BLOFIN_API_PASSPHRASE",
            ),
            rate_limit_ms: 3000,
            shape: ResponseShape::DataArray,
            time_filter: TimeFilter::AfterSeconds,
            table: "Blofin_Orders".to_string(),
            symbol_filter: Vec::new(),
        },
        Source {
            name: "Bybit Executions".to_string(),
            kind: RecordKind::Execution,
            endpoint: "https://api.bybit.com/v5/execution/list?category=linear&limit=100"
                .to_string(),
            auth: AuthScheme::HmacSigned {
                convention: SigningConvention::QueryString,
            },
            credentials: CredentialRefs::key_secret("BYBIT_API_KEY", "BYBIT_API_SECRET"),
            rate_limit_ms: 3000,
            shape: ResponseShape::ResultList,
            time_filter: TimeFilter::StartEndMillis,
            table: "Bybit_Executions".to_string(),
            symbol_filter: Vec::new(),
        },
        Source {
            name: "Bybit Positions".to_string(),
            kind: RecordKind::Position,
            endpoint: "https://api.bybit.com/v5/position/list?category=linear&settleCoin=USDT"
                .to_string(),
            auth: AuthScheme::HmacSigned {
                convention: SigningConvention::QueryString,
            },
            credentials: CredentialRefs::key_secret("BYBIT_API_KEY", "BYBIT_API_SECRET"),
            rate_limit_ms: 1500,
            shape: ResponseShape::ResultList,
            time_filter: TimeFilter::None,
            table: "Bybit_Positions".to_string(),
            symbol_filter: Vec::new(),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_names_unique() {
        let sources = builtin();
        let mut names: Vec<_> = sources.iter().map(|s| s.name.as_str()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), sources.len());
    }

    #[test]
    fn test_builtin_endpoints_well_formed() {
        for source in builtin() {
            let url = url::Url::parse(&source.endpoint).expect("endpoint must parse");
            assert_eq!(url.scheme(), "https", "source {}", source.name);
            assert!(!source.endpoint.contains(char::is_whitespace));
        }
    }

    #[test]
    fn test_public_source_needs_no_credentials() {
        let sources = builtin();
        let coingecko = sources.iter().find(|s| s.name == "CoinGecko").unwrap();
        assert!(!coingecko.requires_credentials());
        assert!(coingecko.resolve_credentials().is_some());
    }

    #[test]
    fn test_missing_credential_resolves_to_none() {
        let source = Source {
            credentials: CredentialRefs::key("TRADESYNC_TEST_UNSET_KEY_VAR"),
            ..builtin().remove(1)
        };
        assert!(source.resolve_credentials().is_none());
    }

    #[test]
    fn test_lookback_defaults_documented_per_kind() {
        assert_eq!(
            default_lookback(RecordKind::MarketTick),
            chrono::Duration::hours(24)
        );
        assert_eq!(default_lookback(RecordKind::Order), chrono::Duration::days(7));
        assert_eq!(
            default_lookback(RecordKind::Position),
            chrono::Duration::days(1)
        );
    }
}

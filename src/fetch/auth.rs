//! Request signing for authenticated sources.
//!
//! Two HMAC-SHA256 conventions are in use upstream:
//! - query-string (Bybit v5): the canonical string is
//!   `timestamp + api_key + recv_window + query_string`, the signature is
//!   hex-encoded and sent in `X-BAPI-SIGN`.
//! - path-and-body (Blofin): the canonical string is
//!   `timestamp + METHOD + request_path + body`, the signature is
//!   base64-encoded and sent in `BF-ACCESS-SIGN`.

use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use url::Url;

use crate::error::{FetchError, SigningSnafu};
use crate::registry::{AuthScheme, Credentials, SigningConvention, Source};

use snafu::prelude::*;

type HmacSha256 = Hmac<Sha256>;

/// Receive window sent with query-string-signed requests, in milliseconds.
const RECV_WINDOW: &str = "5000";

/// Build the extra request headers for a source's auth scheme.
///
/// Public sources get an empty list. `ApiKeyHeader` sources get their one
/// static header. HMAC-signed sources get the full timestamp/signature
/// header set for their convention.
pub fn build_headers(
    source: &Source,
    credentials: &Credentials,
    url: &Url,
    now: DateTime<Utc>,
) -> Result<Vec<(String, String)>, FetchError> {
    match &source.auth {
        AuthScheme::None => Ok(Vec::new()),
        AuthScheme::ApiKeyHeader { header } => {
            let key = require(credentials.api_key.as_deref(), source, "api key")?;
            Ok(vec![(header.clone(), key.to_string())])
        }
        AuthScheme::HmacSigned { convention } => match convention {
            SigningConvention::QueryString => query_string_headers(source, credentials, url, now),
            SigningConvention::PathAndBody => path_and_body_headers(source, credentials, url, now),
        },
    }
}

fn query_string_headers(
    source: &Source,
    credentials: &Credentials,
    url: &Url,
    now: DateTime<Utc>,
) -> Result<Vec<(String, String)>, FetchError> {
    let api_key = require(credentials.api_key.as_deref(), source, "api key")?;
    let secret = require(credentials.api_secret.as_deref(), source, "api secret")?;
    let timestamp = now.timestamp_millis().to_string();
    let query = url.query().unwrap_or("");

    let canonical = query_string_canonical(&timestamp, api_key, RECV_WINDOW, query);
    let signature = hex::encode(hmac_sha256(secret, &canonical, source)?);

    Ok(vec![
        ("X-BAPI-API-KEY".to_string(), api_key.to_string()),
        ("X-BAPI-TIMESTAMP".to_string(), timestamp),
        ("X-BAPI-RECV-WINDOW".to_string(), RECV_WINDOW.to_string()),
        ("X-BAPI-SIGN".to_string(), signature),
    ])
}

fn path_and_body_headers(
    source: &Source,
    credentials: &Credentials,
    url: &Url,
    now: DateTime<Utc>,
) -> Result<Vec<(String, String)>, FetchError> {
    let api_key = require(credentials.api_key.as_deref(), source, "api key")?;
    let secret = require(credentials.api_secret.as_deref(), source, "api secret")?;
    let passphrase = require(credentials.passphrase.as_deref(), source, "passphrase")?;
    let timestamp = now.to_rfc3339_opts(SecondsFormat::Millis, true);

    let request_path = match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    };

    let canonical = path_and_body_canonical(&timestamp, "GET", &request_path, "");
    let digest = hmac_sha256(secret, &canonical, source)?;
    let signature = base64::engine::general_purpose::STANDARD.encode(digest);

    Ok(vec![
        ("BF-ACCESS-KEY".to_string(), api_key.to_string()),
        ("BF-ACCESS-TIMESTAMP".to_string(), timestamp),
        ("BF-ACCESS-PASSPHRASE".to_string(), passphrase.to_string()),
        ("BF-ACCESS-SIGN".to_string(), signature),
    ])
}

/// Canonical string for the query-string convention.
fn query_string_canonical(timestamp: &str, api_key: &str, recv_window: &str, query: &str) -> String {
    format!("{timestamp}{api_key}{recv_window}{query}")
}

/// Canonical string for the path-and-body convention.
fn path_and_body_canonical(timestamp: &str, method: &str, request_path: &str, body: &str) -> String {
    format!("{timestamp}{}{request_path}{body}", method.to_uppercase())
}

fn hmac_sha256(secret: &str, canonical: &str, source: &Source) -> Result<Vec<u8>, FetchError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| {
        SigningSnafu {
            source_name: source.name.clone(),
            message: "invalid secret length".to_string(),
        }
        .build()
    })?;
    mac.update(canonical.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

fn require<'a>(
    value: Option<&'a str>,
    source: &Source,
    what: &str,
) -> Result<&'a str, FetchError> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => SigningSnafu {
            source_name: source.name.clone(),
            message: format!("missing {what}"),
        }
        .fail(),
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

    fn credentials() -> Credentials {
        Credentials {
            api_key: Some("test-key".to_string()),
            api_secret: Some("test-secret".to_string()),
            passphrase: Some("test-pass".to_string()),
        }
    }

    #[test]
    fn test_query_string_canonical_order() {
        let canonical = query_string_canonical(
            "1700000000000",
            "test-key",
            "5000",
            "category=linear&limit=200",
        );
        assert_eq!(canonical, "1700000000000test-key5000category=linear&limit=200");
    }

    #[test]
    fn test_hmac_matches_rfc4231_vector() {
        // RFC 4231 test case 2: key "Jefe", data "what do ya want for nothing?"
        let source = source_named("Bybit Orders");
        let digest = hmac_sha256("Jefe", "what do ya want for nothing?", &source).unwrap();
        assert_eq!(
            hex::encode(digest),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_query_string_signature_fixed_vector() {
        let source = source_named("Bybit Orders");
        let canonical = query_string_canonical(
            "1700000000000",
            "test-key",
            "5000",
            "category=linear&limit=200&startTime=1699000000000&endTime=1700000000000",
        );
        let signature = hex::encode(hmac_sha256("test-secret", &canonical, &source).unwrap());
        assert_eq!(
            signature,
            "a92ee7ff6b48d82564d2da63cbdb7625753dda400c082b95389d5f80bef74fa6"
        );
    }

    #[test]
    fn test_path_and_body_signature_fixed_vector() {
        let source = source_named("Blofin Orders");
        let canonical = path_and_body_canonical(
            "2024-01-15T00:00:00.000Z",
            "get",
            "/api/v1/trade/orders-history?limit=100&after=1699000000",
            "",
        );
        assert_eq!(
            canonical,
            "2024-01-15T00:00:00.000ZGET/api/v1/trade/orders-history?limit=100&after=1699000000"
        );
        let digest = hmac_sha256("test-secret", &canonical, &source).unwrap();
        let signature = base64::engine::general_purpose::STANDARD.encode(digest);
        assert_eq!(signature, "FXTd14fKEFTa1IGyxNL5VGrbH3lxhw7bo7NqQjCKA5w=");
    }

    #[test]
    fn test_query_string_headers_complete() {
        let source = source_named("Bybit Orders");
        let url = Url::parse(&source.endpoint).unwrap();
        let now = Utc::now();

        let headers = build_headers(&source, &credentials(), &url, now).unwrap();
        let names: Vec<_> = headers.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "X-BAPI-API-KEY",
                "X-BAPI-TIMESTAMP",
                "X-BAPI-RECV-WINDOW",
                "X-BAPI-SIGN"
            ]
        );
        // hex-encoded SHA-256 output
        let sign = &headers[3].1;
        assert_eq!(sign.len(), 64);
        assert!(sign.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_path_and_body_headers_complete() {
        let source = source_named("Blofin Orders");
        let url = Url::parse(&source.endpoint).unwrap();
        let now = Utc::now();

        let headers = build_headers(&source, &credentials(), &url, now).unwrap();
        let names: Vec<_> = headers.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "BF-ACCESS-KEY",
                "BF-ACCESS-TIMESTAMP",
                "BF-ACCESS-PASSPHRASE",
                "BF-ACCESS-SIGN"
            ]
        );
    }

    #[test]
    fn test_missing_secret_is_signing_error() {
        let source = source_named("Bybit Orders");
        let url = Url::parse(&source.endpoint).unwrap();
        let creds = Credentials {
            api_key: Some("k".to_string()),
            api_secret: None,
            passphrase: None,
        };
        let err = build_headers(&source, &creds, &url, Utc::now()).unwrap_err();
        assert!(matches!(err, FetchError::Signing { .. }));
    }

    #[test]
    fn test_public_source_gets_no_headers() {
        let source = source_named("CoinGecko");
        let url = Url::parse(&source.endpoint).unwrap();
        let headers =
            build_headers(&source, &Credentials::default(), &url, Utc::now()).unwrap();
        assert!(headers.is_empty());
    }
}

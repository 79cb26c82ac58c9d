//! Per-source normalizers.
//!
//! Maps native API payloads into canonical [`Record`]s. Dispatch is data
//! driven: the source's [`ResponseShape`] selects the envelope walk and the
//! [`RecordKind`] selects the field mapping. Missing numerics default to 0,
//! missing identifiers to the empty string, optional metrics to an empty
//! cell. The original item JSON is always preserved in `raw_data`.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use crate::error::{FetchError, UnexpectedShapeSnafu, UpstreamEnvelopeSnafu};
use crate::record::{Cell, Record, RecordKind};
use crate::registry::{ResponseShape, Source};

use snafu::prelude::*;

/// Normalize a parsed response body into records for `source`.
pub fn normalize(
    source: &Source,
    body: &Value,
    sync_id: &str,
    now: DateTime<Utc>,
) -> Result<Vec<Record>, FetchError> {
    let items = extract_items(source, body)?;

    let mut records = Vec::with_capacity(items.len());
    for item in &items {
        if let Some(record) = normalize_item(source, item, sync_id, now) {
            records.push(record);
        }
    }
    Ok(records)
}

/// Walk the source's envelope and collect the item objects.
fn extract_items(source: &Source, body: &Value) -> Result<Vec<Value>, FetchError> {
    match source.shape {
        ResponseShape::ResultList => {
            check_ret_code(source, body)?;
            let list = body
                .pointer("/result/list")
                .and_then(Value::as_array)
                .context(UnexpectedShapeSnafu {
                    source_name: source.name.clone(),
                    message: "missing result.list array".to_string(),
                })?;
            Ok(list.clone())
        }
        ResponseShape::WalletCoinList => {
            check_ret_code(source, body)?;
            let wallets = body
                .pointer("/result/list")
                .and_then(Value::as_array)
                .context(UnexpectedShapeSnafu {
                    source_name: source.name.clone(),
                    message: "missing result.list array".to_string(),
                })?;
            let mut coins = Vec::new();
            for wallet in wallets {
                if let Some(list) = wallet.get("coin").and_then(Value::as_array) {
                    coins.extend(list.iter().cloned());
                }
            }
            Ok(coins)
        }
        ResponseShape::DataArray => {
            // Blofin signals errors with a non-zero string code.
            if let Some(code) = body.get("code").and_then(|c| parse_i64(c)) {
                if code != 0 {
                    let message = body
                        .get("msg")
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string();
                    return UpstreamEnvelopeSnafu {
                        source_name: source.name.clone(),
                        code,
                        message,
                    }
                    .fail();
                }
            }
            let data = body
                .get("data")
                .and_then(Value::as_array)
                .context(UnexpectedShapeSnafu {
                    source_name: source.name.clone(),
                    message: "missing data array".to_string(),
                })?;
            Ok(data.clone())
        }
        ResponseShape::KeyedObject => {
            let object = body.as_object().context(UnexpectedShapeSnafu {
                source_name: source.name.clone(),
                message: "expected a keyed object".to_string(),
            })?;
            // Fold the key into each item so downstream mapping sees one shape.
            Ok(object
                .iter()
                .map(|(key, value)| {
                    let mut item = value.clone();
                    if let Some(map) = item.as_object_mut() {
                        map.insert("_key".to_string(), Value::String(key.clone()));
                    }
                    item
                })
                .collect())
        }
    }
}

fn check_ret_code(source: &Source, body: &Value) -> Result<(), FetchError> {
    let code = body.get("retCode").and_then(|c| parse_i64(c)).unwrap_or(0);
    if code != 0 {
        let message = body
            .get("retMsg")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        return UpstreamEnvelopeSnafu {
            source_name: source.name.clone(),
            code,
            message,
        }
        .fail();
    }
    Ok(())
}

/// Map one item into a record, or `None` if it is filtered out.
fn normalize_item(
    source: &Source,
    item: &Value,
    sync_id: &str,
    now: DateTime<Utc>,
) -> Option<Record> {
    let record = match source.kind {
        RecordKind::MarketTick => market_tick(source, item, sync_id, now)?,
        RecordKind::Balance => balance(source, item, sync_id, now)?,
        RecordKind::Order => order(source, item, sync_id, now),
        RecordKind::Execution => execution(source, item, sync_id, now),
        RecordKind::Position => position(source, item, sync_id, now),
    };

    debug_assert!(record.matches_schema(), "normalizer produced wrong width");
    Some(record)
}

fn market_tick(source: &Source, item: &Value, sync_id: &str, now: DateTime<Utc>) -> Option<Record> {
    let symbol = text(item, &["symbol", "instId", "_key"]);
    let symbol = if matches!(source.shape, ResponseShape::KeyedObject) {
        symbol.to_uppercase()
    } else {
        symbol
    };
    if !passes_symbol_filter(source, &symbol) {
        return None;
    }

    // Bybit reports the 24h change as a fraction in price24hPcnt; everyone
    // else reports a percentage already.
    let change = if item.get("price24hPcnt").is_some() {
        number(item, &["price24hPcnt"]) * 100.0
    } else {
        number(item, &["priceChangePercent", "change24h", "sodUtc8", "usd_24h_change"])
    };

    let cells = vec![
        Cell::Text(now.to_rfc3339()),
        Cell::Text(source.name.clone()),
        Cell::Text(symbol),
        Cell::Float(number(item, &["lastPrice", "last", "usd", "price"])),
        Cell::Float(change),
        optional_number(item, &["usd_market_cap", "marketCap"]),
        optional_number(item, &["volume24h", "vol24h", "volume"]),
        Cell::Text(sync_id.to_string()),
        Cell::Text(raw(item)),
    ];

    Some(Record {
        kind: RecordKind::MarketTick,
        timestamp: now,
        natural_key: None,
        cells,
    })
}

fn balance(source: &Source, item: &Value, sync_id: &str, now: DateTime<Utc>) -> Option<Record> {
    // Zero balances are noise; the upstream sync dropped them too.
    let wallet_balance = number(item, &["walletBalance"]);
    if wallet_balance <= 0.0 {
        return None;
    }

    let cells = vec![
        Cell::Text(now.to_rfc3339()),
        Cell::Text(source.name.clone()),
        Cell::Text(text(item, &["coin"])),
        Cell::Float(wallet_balance),
        Cell::Float(number(item, &["availableBalance", "availableToWithdraw"])),
        Cell::Float(number(item, &["locked"])),
        Cell::Float(number(item, &["equity"])),
        Cell::Float(number(item, &["usdValue"])),
        optional_number(item, &["unrealisedPnl"]),
        optional_number(item, &["cumRealisedPnl"]),
        optional_number(item, &["accruedInterest"]),
        optional_number(item, &["borrowAmount"]),
        Cell::Text(sync_id.to_string()),
        Cell::Text(raw(item)),
    ];

    Some(Record {
        kind: RecordKind::Balance,
        timestamp: now,
        natural_key: None,
        cells,
    })
}

fn order(source: &Source, item: &Value, sync_id: &str, now: DateTime<Utc>) -> Record {
    let created = millis_timestamp(item, &["createdTime", "cTime"]).unwrap_or(now);
    let order_id = text(item, &["orderId", "ordId"]);

    let cells = vec![
        Cell::Text(created.to_rfc3339()),
        Cell::Text(source.name.clone()),
        Cell::Text(text_or(item, &["category", "instType"], "linear")),
        Cell::Text(text(item, &["symbol", "instId"])),
        Cell::Text(order_id.clone()),
        Cell::Text(text(item, &["orderLinkId", "clOrdId"])),
        Cell::Text(text(item, &["side"])),
        Cell::Text(text(item, &["orderType", "ordType"])),
        Cell::Float(number(item, &["qty", "sz"])),
        Cell::Float(number(item, &["price", "px"])),
        Cell::Text(text(item, &["timeInForce"])),
        Cell::Text(text(item, &["orderStatus", "state"])),
        Cell::Float(number(item, &["avgPrice", "fillPx"])),
        Cell::Float(number(item, &["cumExecQty", "accFillSz"])),
        Cell::Float(number(item, &["cumExecValue"])),
        Cell::Float(number(item, &["cumExecFee", "fee"])),
        Cell::Bool(boolean(item, &["reduceOnly"])),
        Cell::Bool(boolean(item, &["closeOnTrigger"])),
        Cell::Text(text(item, &["createdTime", "cTime"])),
        Cell::Text(text(item, &["updatedTime", "uTime"])),
        Cell::Text(text(item, &["rejectReason"])),
        Cell::Text(text(item, &["stopOrderType"])),
        Cell::Float(number(item, &["triggerPrice"])),
        Cell::Float(number(item, &["takeProfit"])),
        Cell::Float(number(item, &["stopLoss"])),
        Cell::Text(text(item, &["tpTriggerBy"])),
        Cell::Text(text(item, &["slTriggerBy"])),
        Cell::Text(text(item, &["triggerDirection"])),
        Cell::Int(number(item, &["positionIdx"]) as i64),
        Cell::Text(sync_id.to_string()),
        Cell::Text(raw(item)),
    ];

    Record {
        kind: RecordKind::Order,
        timestamp: created,
        natural_key: (!order_id.is_empty()).then(|| format!("{}:{}", source.name, order_id)),
        cells,
    }
}

fn execution(source: &Source, item: &Value, sync_id: &str, now: DateTime<Utc>) -> Record {
    let executed = millis_timestamp(item, &["execTime"]).unwrap_or(now);
    let trade_id = text(item, &["execId", "tradeId"]);

    let cells = vec![
        Cell::Text(executed.to_rfc3339()),
        Cell::Text(source.name.clone()),
        Cell::Text(text(item, &["symbol", "instId"])),
        Cell::Text(text(item, &["side"])),
        Cell::Float(number(item, &["execQty", "fillSz"])),
        Cell::Float(number(item, &["orderPrice", "px"])),
        Cell::Float(number(item, &["execPrice", "fillPx"])),
        optional_number(item, &["closedPnl", "pnl"]),
        Cell::Text(text_or(item, &["execType"], "Trade")),
        Cell::Text(trade_id.clone()),
        Cell::Float(number(item, &["execFee", "fee"])),
        Cell::Text(text(item, &["feeCurrency", "feeCcy"])),
        Cell::Text(text(item, &["execTime", "fillTime"])),
        Cell::Text("API_SYNC".to_string()),
        Cell::Text(sync_id.to_string()),
        Cell::Text(raw(item)),
    ];

    Record {
        kind: RecordKind::Execution,
        timestamp: executed,
        natural_key: (!trade_id.is_empty()).then(|| format!("{}:{}", source.name, trade_id)),
        cells,
    }
}

fn position(source: &Source, item: &Value, sync_id: &str, now: DateTime<Utc>) -> Record {
    let cells = vec![
        Cell::Text(now.to_rfc3339()),
        Cell::Text(source.name.clone()),
        Cell::Text(text_or(item, &["category"], "linear")),
        Cell::Text(text(item, &["symbol", "instId"])),
        Cell::Text(text(item, &["side"])),
        Cell::Float(number(item, &["size", "positions"])),
        Cell::Float(number(item, &["positionValue"])),
        Cell::Float(number(item, &["avgPrice", "averagePrice"])),
        Cell::Float(number(item, &["markPrice"])),
        optional_number(item, &["liqPrice"]),
        optional_number(item, &["unrealisedPnl"]),
        optional_number(item, &["curRealisedPnl"]),
        optional_number(item, &["cumRealisedPnl"]),
        Cell::Float(number(item, &["leverage"])),
        Cell::Text(text(item, &["marginMode", "tradeMode"])),
        Cell::Text(text(item, &["positionStatus"])),
        Cell::Text(text(item, &["createdTime"])),
        Cell::Text(text(item, &["updatedTime"])),
        Cell::Text("API_SYNC".to_string()),
        Cell::Text(sync_id.to_string()),
        Cell::Text(raw(item)),
    ];

    Record {
        kind: RecordKind::Position,
        timestamp: now,
        natural_key: None,
        cells,
    }
}

fn passes_symbol_filter(source: &Source, symbol: &str) -> bool {
    source.symbol_filter.is_empty() || source.symbol_filter.iter().any(|s| s == symbol)
}

/// First present key as text; empty string if none.
fn text(item: &Value, keys: &[&str]) -> String {
    text_or(item, keys, "")
}

fn text_or(item: &Value, keys: &[&str], default: &str) -> String {
    for key in keys {
        match item.get(key) {
            Some(Value::String(s)) if !s.is_empty() => return s.clone(),
            Some(Value::Number(n)) => return n.to_string(),
            Some(Value::Bool(b)) => return b.to_string(),
            _ => continue,
        }
    }
    default.to_string()
}

/// First present key as a number; 0.0 if none parse.
fn number(item: &Value, keys: &[&str]) -> f64 {
    parse_number(item, keys).unwrap_or(0.0)
}

/// First present key as a number; empty cell if none parse.
fn optional_number(item: &Value, keys: &[&str]) -> Cell {
    match parse_number(item, keys) {
        Some(n) => Cell::Float(n),
        None => Cell::Empty,
    }
}

fn parse_number(item: &Value, keys: &[&str]) -> Option<f64> {
    for key in keys {
        match item.get(key) {
            Some(Value::Number(n)) => return n.as_f64(),
            Some(Value::String(s)) => {
                if let Ok(parsed) = s.parse::<f64>() {
                    return Some(parsed);
                }
            }
            _ => continue,
        }
    }
    None
}

fn boolean(item: &Value, keys: &[&str]) -> bool {
    for key in keys {
        match item.get(key) {
            Some(Value::Bool(b)) => return *b,
            Some(Value::String(s)) => return s == "true",
            _ => continue,
        }
    }
    false
}

fn parse_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// First present key parsed as epoch milliseconds.
fn millis_timestamp(item: &Value, keys: &[&str]) -> Option<DateTime<Utc>> {
    for key in keys {
        if let Some(ms) = item.get(key).and_then(parse_i64) {
            if let Some(ts) = Utc.timestamp_millis_opt(ms).single() {
                return Some(ts);
            }
        }
    }
    None
}

fn raw(item: &Value) -> String {
    serde_json::to_string(item).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry;
    use serde_json::json;

    fn source_named(name: &str) -> Source {
        registry::builtin()
            .into_iter()
            .find(|s| s.name == name)
            .unwrap()
    }

    #[test]
    fn test_generic_ticker_normalization() {
        let source = source_named("Bybit");
        let body = json!({
            "retCode": 0,
            "retMsg": "OK",
            "result": {
                "list": [
                    {"symbol": "BTCUSDT", "lastPrice": "65000.5", "volume": "120.3", "priceChangePercent": "2.1"}
                ]
            }
        });

        let records = normalize(&source, &body, "sync_1", Utc::now()).unwrap();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert!(record.matches_schema());

        // columns: timestamp, source, symbol, price_usd, change_24h_percent,
        // market_cap_usd, volume_24h, sync_id, raw_data
        assert_eq!(record.cells[2], Cell::Text("BTCUSDT".to_string()));
        assert_eq!(record.cells[3], Cell::Float(65000.5));
        assert_eq!(record.cells[4], Cell::Float(2.1));
        assert_eq!(record.cells[6], Cell::Float(120.3));
        assert_eq!(record.cells[7], Cell::Text("sync_1".to_string()));

        // Raw payload preserved verbatim (round-trips to the same value).
        let Cell::Text(raw_data) = &record.cells[8] else {
            panic!("raw_data must be text")
        };
        let reparsed: Value = serde_json::from_str(raw_data).unwrap();
        assert_eq!(reparsed["lastPrice"], "65000.5");
    }

    #[test]
    fn test_bybit_fractional_change_scaled() {
        let source = source_named("Bybit");
        let body = json!({
            "retCode": 0,
            "result": {"list": [{"symbol": "ETHUSDT", "lastPrice": "3000", "price24hPcnt": "0.021", "volume24h": "10"}]}
        });

        let records = normalize(&source, &body, "s", Utc::now()).unwrap();
        assert_eq!(records[0].cells[4], Cell::Float(2.1));
    }

    #[test]
    fn test_ret_code_error_surfaces_as_envelope_error() {
        let source = source_named("Bybit");
        let body = json!({"retCode": 10003, "retMsg": "API key is invalid", "result": {}});

        let err = normalize(&source, &body, "s", Utc::now()).unwrap_err();
        match err {
            FetchError::UpstreamEnvelope { code, message, .. } => {
                assert_eq!(code, 10003);
                assert_eq!(message, "API key is invalid");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_coingecko_keyed_object() {
        let source = source_named("CoinGecko");
        let body = json!({
            "bitcoin": {"usd": 65000.5, "usd_24h_change": 2.1, "usd_market_cap": 1.2e12},
            "ethereum": {"usd": 3000.0, "usd_24h_change": -1.5, "usd_market_cap": 3.6e11}
        });

        let mut records = normalize(&source, &body, "s", Utc::now()).unwrap();
        records.sort_by(|a, b| a.cells[2].render().cmp(&b.cells[2].render()));
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].cells[2], Cell::Text("BITCOIN".to_string()));
        assert_eq!(records[0].cells[3], Cell::Float(65000.5));
        assert_eq!(records[0].cells[5], Cell::Float(1.2e12));
        // CoinGecko simple/price has no volume; optional metric stays empty.
        assert_eq!(records[0].cells[6], Cell::Empty);
    }

    #[test]
    fn test_blofin_symbol_filter() {
        let source = source_named("Blofin");
        let body = json!({
            "code": "0",
            "data": [
                {"instId": "BTC-USDT", "last": "65000", "vol24h": "5", "change24h": "1.0"},
                {"instId": "DOGE-USDT", "last": "0.1", "vol24h": "9", "change24h": "0.5"}
            ]
        });

        let records = normalize(&source, &body, "s", Utc::now()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].cells[2], Cell::Text("BTC-USDT".to_string()));
    }

    #[test]
    fn test_wallet_coins_flattened_and_zero_balances_dropped() {
        let source = source_named("Bybit Wallet");
        let body = json!({
            "retCode": 0,
            "result": {"list": [{
                "accountType": "UNIFIED",
                "coin": [
                    {"coin": "USDT", "walletBalance": "1000.5", "availableToWithdraw": "900", "usdValue": "1000.5", "equity": "1000.5"},
                    {"coin": "DUST", "walletBalance": "0"}
                ]
            }]}
        });

        let records = normalize(&source, &body, "s", Utc::now()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, RecordKind::Balance);
        assert!(records[0].matches_schema());
        assert_eq!(records[0].cells[2], Cell::Text("USDT".to_string()));
        assert_eq!(records[0].cells[3], Cell::Float(1000.5));
    }

    #[test]
    fn test_bybit_order_mapping_and_natural_key() {
        let source = source_named("Bybit Orders");
        let body = json!({
            "retCode": 0,
            "result": {"list": [{
                "orderId": "abc-123",
                "symbol": "BTCUSDT",
                "side": "Buy",
                "orderType": "Limit",
                "qty": "0.5",
                "price": "60000",
                "orderStatus": "Filled",
                "cumExecQty": "0.5",
                "createdTime": "1700000000000",
                "updatedTime": "1700000100000",
                "reduceOnly": false
            }]}
        });

        let records = normalize(&source, &body, "s", Utc::now()).unwrap();
        let record = &records[0];
        assert!(record.matches_schema());
        assert_eq!(
            record.natural_key.as_deref(),
            Some("Bybit Orders:abc-123")
        );
        assert_eq!(
            record.timestamp,
            Utc.timestamp_millis_opt(1_700_000_000_000).unwrap()
        );
        // Unknown fields default per policy: empty identifier, zero numeric.
        assert_eq!(record.cells[20], Cell::Text(String::new())); // reject_reason
        assert_eq!(record.cells[22], Cell::Float(0.0)); // trigger_price
    }

    #[test]
    fn test_blofin_order_maps_into_canonical_schema() {
        let source = source_named("Blofin Orders");
        let body = json!({
            "code": "0",
            "data": [{
                "ordId": "55501",
                "instId": "ETH-USDT",
                "instType": "SWAP",
                "side": "sell",
                "ordType": "market",
                "sz": "2",
                "px": "3000",
                "state": "filled",
                "accFillSz": "2",
                "fillPx": "2999.5",
                "fee": "0.12",
                "cTime": "1700000000000",
                "uTime": "1700000050000"
            }]
        });

        let records = normalize(&source, &body, "s", Utc::now()).unwrap();
        let record = &records[0];
        assert_eq!(record.kind, RecordKind::Order);
        assert!(record.matches_schema());
        assert_eq!(record.cells[2], Cell::Text("SWAP".to_string())); // category
        assert_eq!(record.cells[4], Cell::Text("55501".to_string())); // order_id
        assert_eq!(record.cells[11], Cell::Text("filled".to_string())); // order_status
        assert_eq!(record.cells[12], Cell::Float(2999.5)); // avg_price
    }

    #[test]
    fn test_execution_mapping() {
        let source = source_named("Bybit Executions");
        let body = json!({
            "retCode": 0,
            "result": {"list": [{
                "execId": "e-9",
                "symbol": "SOLUSDT",
                "side": "Sell",
                "execQty": "10",
                "execPrice": "150.25",
                "orderPrice": "150.00",
                "execType": "Trade",
                "execFee": "0.05",
                "execTime": "1700000000000"
            }]}
        });

        let records = normalize(&source, &body, "s", Utc::now()).unwrap();
        let record = &records[0];
        assert!(record.matches_schema());
        assert_eq!(record.natural_key.as_deref(), Some("Bybit Executions:e-9"));
        assert_eq!(record.cells[6], Cell::Float(150.25)); // exit_price
        assert_eq!(record.cells[7], Cell::Empty); // realized_pnl absent
    }

    #[test]
    fn test_missing_list_is_unexpected_shape() {
        let source = source_named("Bybit");
        let body = json!({"retCode": 0, "result": {}});
        let err = normalize(&source, &body, "s", Utc::now()).unwrap_err();
        assert!(matches!(err, FetchError::UnexpectedShape { .. }));
    }
}

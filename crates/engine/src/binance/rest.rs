use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use common::{Bar, Contract, Error, KBars, MarketDataClient, Result};

const BASE_URL: &str = "https://api.binance.com";

/// Binance caps one klines request at this many rows.
const KLINES_PAGE: usize = 1000;

/// Binance interval string for a timeframe (`60m` is accepted for `1h`).
pub fn binance_interval(timeframe: &str) -> Option<&'static str> {
    Some(match timeframe.trim().to_ascii_lowercase().as_str() {
        "1m" => "1m",
        "3m" => "3m",
        "5m" => "5m",
        "15m" => "15m",
        "30m" => "30m",
        "60m" | "1h" => "1h",
        "2h" => "2h",
        "4h" => "4h",
        "1d" => "1d",
        _ => return None,
    })
}

/// Public market data REST client for Binance (no signing required).
pub struct BinanceMarket {
    base_url: String,
    http: Client,
}

impl BinanceMarket {
    pub fn new() -> Result<Self> {
        Self::with_base_url(BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .use_rustls_tls()
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into(),
            http,
        })
    }

    async fn get(&self, path: &str, query: &str) -> Result<String> {
        let url = format!("{}{path}?{query}", self.base_url);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;

        if !status.is_success() {
            return Err(Error::MarketData(format!("HTTP {status}: {body}")));
        }
        Ok(body)
    }

    /// One page of klines ending at `end_ms` (inclusive) when given.
    async fn klines_page(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
        end_ms: Option<i64>,
    ) -> Result<Vec<Bar>> {
        let mut query = format!("symbol={symbol}&interval={interval}&limit={limit}");
        if let Some(end) = end_ms {
            query.push_str(&format!("&endTime={end}"));
        }
        let body = self.get("/api/v3/klines", &query).await?;
        parse_klines(&body)
    }
}

#[async_trait]
impl MarketDataClient for BinanceMarket {
    async fn get_contract(&self, symbol: &str) -> Result<Option<Contract>> {
        let body = match self.get("/api/v3/exchangeInfo", &format!("symbol={symbol}")).await {
            Ok(body) => body,
            // Unknown symbols are a 400 from Binance.
            Err(Error::MarketData(msg)) if msg.starts_with("HTTP 400") => return Ok(None),
            Err(e) => return Err(e),
        };
        let info: ExchangeInfo = serde_json::from_str(&body)?;
        Ok(info
            .symbols
            .into_iter()
            .find(|s| s.symbol == symbol && s.status == "TRADING")
            .map(|s| Contract {
                symbol: s.symbol,
                exchange: "BINANCE".to_string(),
            }))
    }

    /// Most recent `count` closed klines, oldest first. Pages backwards
    /// when `count` exceeds one request.
    async fn get_kbars(&self, contract: &Contract, timeframe: &str, count: usize) -> Result<KBars> {
        let interval = binance_interval(timeframe)
            .ok_or_else(|| Error::MarketData(format!("unsupported timeframe '{timeframe}'")))?;

        // One extra row: the newest kline is usually still open.
        let wanted = count + 1;
        let mut bars: Vec<Bar> = Vec::with_capacity(wanted);
        let mut end_ms = None;
        while bars.len() < wanted {
            let limit = (wanted - bars.len()).min(KLINES_PAGE);
            let page = self.klines_page(&contract.symbol, interval, limit, end_ms).await?;
            let Some(first) = page.first() else { break };
            end_ms = Some(first.timestamp.timestamp_millis() - 1);
            let short = page.len() < limit;
            bars.splice(0..0, page);
            if short {
                break;
            }
        }
        drop_open_bar(&mut bars, timeframe, Utc::now());
        if bars.len() > count {
            bars.drain(..bars.len() - count);
        }
        debug!(symbol = %contract.symbol, interval, requested = count, fetched = bars.len(), "klines fetched");
        Ok(KBars::from_bars(&bars))
    }
}

/// Remove the last bar when its period has not ended yet at `now`.
fn drop_open_bar(bars: &mut Vec<Bar>, timeframe: &str, now: DateTime<Utc>) {
    let Some(secs) = common::timeframe_secs(timeframe) else { return };
    if let Some(last) = bars.last() {
        if last.timestamp + chrono::Duration::seconds(secs) > now {
            bars.pop();
        }
    }
}

// ─── Response types ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Deserialize)]
struct SymbolInfo {
    symbol: String,
    status: String,
}

/// Klines are positional arrays: `[openTime, open, high, low, close, volume, closeTime, ...]`
/// with prices as strings.
pub(crate) fn parse_klines(body: &str) -> Result<Vec<Bar>> {
    let rows: Vec<Vec<Value>> = serde_json::from_str(body)?;
    rows.iter().map(|row| parse_kline_row(row)).collect()
}

fn parse_kline_row(row: &[Value]) -> Result<Bar> {
    let field = |i: usize| -> Result<f64> {
        row.get(i)
            .and_then(|v| match v {
                Value::String(s) => s.parse().ok(),
                Value::Number(n) => n.as_f64(),
                _ => None,
            })
            .ok_or_else(|| Error::MarketData(format!("malformed kline field {i}")))
    };
    let open_ms = row
        .first()
        .and_then(Value::as_i64)
        .ok_or_else(|| Error::MarketData("kline without open time".to_string()))?;
    Ok(Bar {
        timestamp: millis(open_ms)?,
        open: field(1)?,
        high: field(2)?,
        low: field(3)?,
        close: field(4)?,
        volume: field(5)?,
    })
}

pub(crate) fn millis(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| Error::MarketData(format!("invalid timestamp {ms}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_kline_rows() {
        let body = r#"[
            [1499040000000, "0.01634790", "0.80000000", "0.01575800", "0.01577100", "148976.11427815",
             1499644799999, "2434.19055334", 308, "1756.87402397", "28.46694368", "0"]
        ]"#;
        let bars = parse_klines(body).unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].timestamp.timestamp_millis(), 1499040000000);
        assert!((bars[0].close - 0.015771).abs() < 1e-12);
        assert!((bars[0].volume - 148976.11427815).abs() < 1e-6);
    }

    #[test]
    fn rejects_malformed_rows() {
        assert!(parse_klines(r#"[[1499040000000, "x"]]"#).is_err());
    }

    #[test]
    fn open_bar_is_dropped() {
        let body = r#"[
            [1700000000000, "1", "1", "1", "1", "1"],
            [1700000060000, "2", "2", "2", "2", "2"]
        ]"#;
        let mut bars = parse_klines(body).unwrap();
        let now = millis(1700000090000).unwrap();
        drop_open_bar(&mut bars, "1m", now);
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].close, 1.0);

        drop_open_bar(&mut bars, "1m", now);
        assert_eq!(bars.len(), 1);
    }

    #[test]
    fn maps_timeframes() {
        assert_eq!(binance_interval("60m"), Some("1h"));
        assert_eq!(binance_interval("15M"), Some("15m"));
        assert_eq!(binance_interval("7m"), None);
    }
}

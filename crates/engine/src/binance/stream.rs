use std::time::Duration;

use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::broadcast;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

use common::{Bar, BarEvent, Error, Result};

use super::rest::{binance_interval, millis};

const STREAM_URL: &str = "wss://stream.binance.com:9443/ws";

/// Binance kline WebSocket stream for one symbol and timeframe.
///
/// Only closed candles are published, so every event is a finished bar.
/// Reconnects with exponential backoff.
pub struct BinanceKlineStream {
    symbol: String,
    timeframe: String,
    bar_tx: broadcast::Sender<BarEvent>,
}

impl BinanceKlineStream {
    pub fn new(
        symbol: impl Into<String>,
        timeframe: impl Into<String>,
        bar_tx: broadcast::Sender<BarEvent>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe: timeframe.into(),
            bar_tx,
        }
    }

    /// Run the stream loop forever. Call this inside a `tokio::spawn`.
    pub async fn run(self) {
        let mut backoff = Duration::from_secs(1);
        const MAX_BACKOFF: Duration = Duration::from_secs(60);

        loop {
            info!(symbol = %self.symbol, timeframe = %self.timeframe, "Connecting to Binance kline stream");
            match self.connect_once().await {
                Ok(()) => {
                    info!(symbol = %self.symbol, "Kline stream closed cleanly");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    backoff = Duration::from_secs(1);
                }
                Err(e) => {
                    warn!(symbol = %self.symbol, error = %e, backoff = ?backoff, "Kline stream error, reconnecting");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }

    async fn connect_once(&self) -> Result<()> {
        let interval = binance_interval(&self.timeframe)
            .ok_or_else(|| Error::MarketData(format!("unsupported timeframe '{}'", self.timeframe)))?;
        let url = Url::parse(&format!(
            "{STREAM_URL}/{}@kline_{interval}",
            self.symbol.to_lowercase()
        ))
        .map_err(|e| Error::WebSocket(e.to_string()))?;

        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| Error::WebSocket(e.to_string()))?;
        let (_, mut read) = ws_stream.split();

        while let Some(msg) = read.next().await {
            let msg = msg.map_err(|e| Error::WebSocket(e.to_string()))?;
            if let Message::Text(text) = msg {
                match parse_closed_kline(&text) {
                    Ok(Some(bar)) => {
                        debug!(symbol = %self.symbol, close = bar.close, "Closed bar");
                        let _ = self.bar_tx.send(BarEvent {
                            symbol: self.symbol.clone(),
                            timeframe: self.timeframe.clone(),
                            bar,
                        });
                    }
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "Failed to parse kline event"),
                }
            }
        }
        Ok(())
    }
}

// ─── Kline JSON parsing ───────────────────────────────────────────────────────

#[derive(Deserialize)]
struct KlineWrapper {
    k: KlineData,
}

#[derive(Deserialize)]
struct KlineData {
    #[serde(rename = "t")]
    open_time_ms: i64,
    #[serde(rename = "o")]
    open: String,
    #[serde(rename = "h")]
    high: String,
    #[serde(rename = "l")]
    low: String,
    #[serde(rename = "c")]
    close: String,
    #[serde(rename = "v")]
    volume: String,
    #[serde(rename = "x")]
    is_closed: bool,
}

/// A finished bar from a kline message. `None` for other messages and for
/// candles still in progress.
fn parse_closed_kline(text: &str) -> Result<Option<Bar>> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    if value.get("e").and_then(|v| v.as_str()) != Some("kline") {
        return Ok(None);
    }
    let k = serde_json::from_value::<KlineWrapper>(value)?.k;
    if !k.is_closed {
        return Ok(None);
    }

    let num = |s: &str, field: &str| {
        s.parse::<f64>()
            .map_err(|_| Error::MarketData(format!("malformed kline {field}: '{s}'")))
    };
    Ok(Some(Bar {
        timestamp: millis(k.open_time_ms)?,
        open: num(&k.open, "open")?,
        high: num(&k.high, "high")?,
        low: num(&k.low, "low")?,
        close: num(&k.close, "close")?,
        volume: num(&k.volume, "volume")?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(closed: bool) -> String {
        format!(
            r#"{{"e":"kline","E":1672515782136,"s":"BTCUSDT","k":{{"t":1672515780000,"T":1672515839999,
            "s":"BTCUSDT","i":"1m","o":"0.0010","c":"0.0020","h":"0.0025","l":"0.0015","v":"1000",
            "n":100,"x":{closed},"q":"1.0000","V":"500","Q":"0.500","B":"123456"}}}}"#
        )
    }

    #[test]
    fn closed_kline_becomes_a_bar() {
        let bar = parse_closed_kline(&message(true)).unwrap().unwrap();
        assert_eq!(bar.timestamp.timestamp_millis(), 1672515780000);
        assert_eq!(bar.close, 0.002);
        assert_eq!(bar.high, 0.0025);
    }

    #[test]
    fn open_kline_and_other_events_are_skipped() {
        assert!(parse_closed_kline(&message(false)).unwrap().is_none());
        assert!(parse_closed_kline(r#"{"e":"trade","p":"1.0"}"#).unwrap().is_none());
    }
}

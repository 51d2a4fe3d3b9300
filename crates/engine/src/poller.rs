use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use common::{BarEvent, Contract, Error, MarketDataClient, Result};

/// Bars requested per poll. Enough to cover a few missed intervals.
const POLL_WINDOW: usize = 10;

/// Publishes closed bars by polling `get_kbars`, for venues or modes without
/// a push stream.
pub struct BarPoller {
    market: Arc<dyn MarketDataClient>,
    symbol: String,
    timeframe: String,
    every: Duration,
    bar_tx: broadcast::Sender<BarEvent>,
    contract: Option<Contract>,
    last_seen: Option<DateTime<Utc>>,
}

impl BarPoller {
    pub fn new(
        market: Arc<dyn MarketDataClient>,
        symbol: impl Into<String>,
        timeframe: impl Into<String>,
        every: Duration,
        bar_tx: broadcast::Sender<BarEvent>,
    ) -> Self {
        Self {
            market,
            symbol: symbol.into(),
            timeframe: timeframe.into(),
            every,
            bar_tx,
            contract: None,
            last_seen: None,
        }
    }

    /// Poll forever. Call this inside a `tokio::spawn`.
    pub async fn run(mut self) {
        info!(symbol = %self.symbol, timeframe = %self.timeframe, every = ?self.every, "Bar poller started");
        let mut ticker = tokio::time::interval(self.every);
        loop {
            ticker.tick().await;
            if let Err(e) = self.poll_once().await {
                warn!(symbol = %self.symbol, error = %e, "Bar poll failed");
            }
        }
    }

    /// Publish bars newer than the last one seen. The first poll only records
    /// where the series ends. Returns how many bars were published.
    pub async fn poll_once(&mut self) -> Result<usize> {
        let contract = match &self.contract {
            Some(c) => c.clone(),
            None => {
                let c = self
                    .market
                    .get_contract(&self.symbol)
                    .await?
                    .ok_or_else(|| Error::MarketData(format!("contract not found: {}", self.symbol)))?;
                self.contract = Some(c.clone());
                c
            }
        };

        let bars = self
            .market
            .get_kbars(&contract, &self.timeframe, POLL_WINDOW)
            .await?
            .to_bars();
        let Some(newest) = bars.last().map(|b| b.timestamp) else {
            return Ok(0);
        };

        let Some(last_seen) = self.last_seen else {
            self.last_seen = Some(newest);
            return Ok(0);
        };

        let mut published = 0;
        for bar in bars.into_iter().filter(|b| b.timestamp > last_seen) {
            debug!(symbol = %self.symbol, ts = %bar.timestamp, close = bar.close, "Polled bar");
            let _ = self.bar_tx.send(BarEvent {
                symbol: self.symbol.clone(),
                timeframe: self.timeframe.clone(),
                bar,
            });
            published += 1;
        }
        self.last_seen = Some(newest.max(last_seen));
        Ok(published)
    }
}

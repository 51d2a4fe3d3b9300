use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};

use common::{Bar, Contract, KBars, MarketDataClient, Result};

/// In-memory market data source.
///
/// Each symbol holds one bar series; the timeframe argument of `get_kbars` is
/// not interpreted, the series is served as stored.
#[derive(Clone)]
pub struct PaperMarket {
    exchange: String,
    series: Arc<RwLock<HashMap<String, Vec<Bar>>>>,
}

impl Default for PaperMarket {
    fn default() -> Self {
        Self::new()
    }
}

impl PaperMarket {
    pub fn new() -> Self {
        Self {
            exchange: "PAPER".to_string(),
            series: Arc::default(),
        }
    }

    /// Replace the series for `symbol`.
    pub async fn insert(&self, symbol: &str, bars: Vec<Bar>) {
        info!(symbol, bars = bars.len(), "PaperMarket series loaded");
        self.series.write().await.insert(symbol.to_string(), bars);
    }

    /// Append one bar (used by the offline feed).
    pub async fn push(&self, symbol: &str, bar: Bar) {
        self.series
            .write()
            .await
            .entry(symbol.to_string())
            .or_default()
            .push(bar);
    }

    pub async fn symbols(&self) -> Vec<String> {
        let mut out: Vec<String> = self.series.read().await.keys().cloned().collect();
        out.sort();
        out
    }
}

#[async_trait]
impl MarketDataClient for PaperMarket {
    async fn get_contract(&self, symbol: &str) -> Result<Option<Contract>> {
        let known = self.series.read().await.contains_key(symbol);
        Ok(known.then(|| Contract {
            symbol: symbol.to_string(),
            exchange: self.exchange.clone(),
        }))
    }

    async fn get_kbars(&self, contract: &Contract, timeframe: &str, count: usize) -> Result<KBars> {
        let series = self.series.read().await;
        let bars = series.get(&contract.symbol).map(Vec::as_slice).unwrap_or_default();
        let start = bars.len().saturating_sub(count);
        debug!(symbol = %contract.symbol, timeframe, count, served = bars.len() - start, "paper kbars");
        Ok(KBars::from_bars(&bars[start..]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic;

    #[tokio::test]
    async fn unknown_symbol_has_no_contract() {
        let market = PaperMarket::new();
        assert!(market.get_contract("TXF").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn serves_most_recent_bars() {
        let market = PaperMarket::new();
        market.insert("TXF", synthetic::sine_wave(50, 100.0, 5.0, 20.0)).await;
        let contract = market.get_contract("TXF").await.unwrap().unwrap();

        let kbars = market.get_kbars(&contract, "15m", 10).await.unwrap();
        assert_eq!(kbars.len(), 10);
        let all = synthetic::sine_wave(50, 100.0, 5.0, 20.0);
        assert_eq!(kbars.to_bars(), all[40..].to_vec());

        let more = market.get_kbars(&contract, "15m", 500).await.unwrap();
        assert_eq!(more.len(), 50);
    }

    #[tokio::test]
    async fn push_extends_series() {
        let market = PaperMarket::new();
        for bar in synthetic::flat(3, 10.0) {
            market.push("MXF", bar).await;
        }
        let contract = market.get_contract("MXF").await.unwrap().unwrap();
        assert_eq!(market.get_kbars(&contract, "15m", 100).await.unwrap().len(), 3);
        assert_eq!(market.symbols().await, vec!["MXF".to_string()]);
    }
}

use async_trait::async_trait;

use crate::{Contract, KBars, Result};

/// Source of instrument metadata and historical bars.
///
/// `BinanceMarket` implements this against the exchange REST API.
/// `PaperMarket` serves in-memory or synthetic series for simulation and tests.
#[async_trait]
pub trait MarketDataClient: Send + Sync {
    /// Resolve a symbol. `None` when the venue does not list it.
    async fn get_contract(&self, symbol: &str) -> Result<Option<Contract>>;

    /// The most recent `count` closed bars, oldest first.
    async fn get_kbars(&self, contract: &Contract, timeframe: &str, count: usize) -> Result<KBars>;
}

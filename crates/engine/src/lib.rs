pub mod backtest;
pub mod binance;
pub mod poller;
pub mod runner;
pub mod store;

pub use backtest::{ArtifactTag, BacktestEngine, BacktestReport, BacktestRequest};
pub use binance::{BinanceKlineStream, BinanceMarket};
pub use poller::BarPoller;
pub use runner::{EngineHandle, RunnerConfig, SlotPhase, StrategyRunner, StrategySnapshot};
pub use store::SqliteStrategyStore;

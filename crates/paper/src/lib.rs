//! Simulated order layer and offline market data.
//!
//! No real orders are ever sent: fills are produced at the bar close with
//! configurable slippage.

pub mod broker;
pub mod market;
pub mod replay;
pub mod synthetic;

pub use broker::PaperBroker;
pub use market::PaperMarket;
pub use replay::{ReplayMode, ReplayTrace, Replayer};

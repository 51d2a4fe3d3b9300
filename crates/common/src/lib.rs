pub mod config;
pub mod error;
pub mod llm;
pub mod market;
pub mod notify;
pub mod store;
pub mod types;

pub use config::Config;
pub use error::{Error, PipelineError, Result};
pub use llm::LanguageModel;
pub use market::MarketDataClient;
pub use notify::{LogNotifier, Notifier};
pub use store::{MemoryStrategyStore, StrategyStore};
pub use types::*;

//! Strategy programs: the script language, the indicator service and the
//! per-strategy executor.

pub mod config;
pub mod executor;
pub mod indicators;
pub mod loader;
pub mod script;
pub mod window;

pub use config::{StrategyConfig, StrategyFileConfig};
pub use executor::{order_side, ExecutorStatus, StrategyExecutor};
pub use loader::{extract_unit_name, load, CompiledUnit, StrategyInstance};
pub use script::{ExecutionError, LoadError};
pub use window::MarketWindow;

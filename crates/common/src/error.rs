use thiserror::Error;

use crate::VerificationStage;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Market data error: {0}")]
    MarketData(String),

    #[error("LLM backend error: {0}")]
    Llm(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Strategy not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failures of the synthesis → load → verify → backtest pipeline.
///
/// Each variant carries the reason surfaced to the operator. All of them are
/// terminal for the operation that raised them.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error("generation failed: {0}")]
    Generation(String),

    #[error("load failed: {0}")]
    Load(String),

    #[error("Stage 1 failed: {0}")]
    Review(String),

    #[error("Stage 2 failed: {0}")]
    BacktestCheck(String),

    #[error("backtest failed: {0}")]
    Backtest(String),
}

impl PipelineError {
    pub fn reason(&self) -> &str {
        match self {
            PipelineError::Generation(r)
            | PipelineError::Load(r)
            | PipelineError::Review(r)
            | PipelineError::BacktestCheck(r)
            | PipelineError::Backtest(r) => r,
        }
    }

    /// Map a verification stage and its reason onto the matching variant.
    pub fn from_stage(stage: VerificationStage, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        match stage {
            VerificationStage::Load => PipelineError::Load(reason),
            VerificationStage::Review => PipelineError::Review(reason),
            VerificationStage::BacktestCheck => PipelineError::BacktestCheck(reason),
        }
    }
}

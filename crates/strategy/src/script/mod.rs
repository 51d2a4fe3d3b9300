//! The strategy script language.
//!
//! ```text
//! strategy RsiReversal:
//!     state armed = false
//!     on_bar(bar):
//!         let r = ta("RSI", period=14)
//!         if r == none:
//!             return hold
//!         if position == 0 and r[-1] < 30:
//!             return buy
//!         if position > 0 and r[-1] > 70:
//!             return close
//!         return hold
//! ```
//!
//! A program declares exactly one `strategy`, optional typed `state` slots
//! and a single `on_bar(bar)` handler. There are no loops and no user
//! functions; only the builtins in [`checker::FUNCTIONS`] can be called.

pub mod ast;
pub mod checker;
pub mod interp;
pub mod lexer;
pub mod parser;
pub mod state;
pub mod value;

use thiserror::Error;

pub use state::{StateStore, StateValue};
pub use value::Value;

/// Why program text could not be turned into a runnable unit.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LoadError {
    #[error("program text is empty")]
    Empty,

    #[error("no strategy declaration found")]
    NoUnit,

    #[error("line {line}, column {column}: {message}")]
    Syntax {
        line: usize,
        column: usize,
        message: String,
    },

    /// Parsed, but uses something outside the allowed vocabulary.
    #[error("line {line}, column {column}: {message}")]
    Rejected {
        line: usize,
        column: usize,
        message: String,
    },
}

impl LoadError {
    pub fn syntax(line: usize, column: usize, message: impl Into<String>) -> Self {
        LoadError::Syntax {
            line,
            column,
            message: message.into(),
        }
    }

    pub fn rejected(line: usize, column: usize, message: impl Into<String>) -> Self {
        LoadError::Rejected {
            line,
            column,
            message: message.into(),
        }
    }

    /// Source line of the defect, when there is one.
    pub fn line(&self) -> Option<usize> {
        match self {
            LoadError::Syntax { line, .. } | LoadError::Rejected { line, .. } => Some(*line),
            _ => None,
        }
    }
}

/// A runtime fault inside `on_bar`.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("line {line}: {message}")]
pub struct ExecutionError {
    pub line: usize,
    pub message: String,
}

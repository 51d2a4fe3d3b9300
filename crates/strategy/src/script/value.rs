use std::sync::Arc;

use common::{Bar, Signal};

use crate::indicators::Frame;

/// Runtime value inside a handler invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    Number(f64),
    Str(String),
    Signal(Signal),
    Series(Arc<[f64]>),
    Frame(Arc<Frame>),
    Bar(Bar),
    Bars(Arc<[Bar]>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "none",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Signal(_) => "signal",
            Value::Series(_) => "series",
            Value::Frame(_) => "frame",
            Value::Bar(_) => "bar",
            Value::Bars(_) => "bars",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            Value::Signal(s) => s.is_trade(),
            Value::Series(s) => !s.is_empty(),
            Value::Frame(f) => !f.is_empty(),
            Value::Bar(_) => true,
            Value::Bars(b) => !b.is_empty(),
        }
    }

    /// The signal this value names, if any. Strings are matched by name.
    pub fn as_signal(&self) -> Option<Signal> {
        match self {
            Value::Signal(s) => Some(*s),
            Value::Str(s) => Signal::parse(s),
            _ => None,
        }
    }

    /// Short rendering used in anomaly logs.
    pub fn describe(&self) -> String {
        match self {
            Value::None => "none".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            Value::Str(s) => format!("{s:?}"),
            Value::Signal(s) => s.to_string(),
            other => other.type_name().to_string(),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<Option<f64>> for Value {
    fn from(n: Option<f64>) -> Self {
        n.map(Value::Number).unwrap_or(Value::None)
    }
}

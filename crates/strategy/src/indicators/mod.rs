//! Technical indicator service.
//!
//! `compute` is the single entry point used by strategy programs through
//! `ta(name, key=value, ...)`. It is pure: the same window and parameters
//! always yield the same output.

pub mod bands;
pub mod ma;
pub mod macd;
pub mod oscillators;
pub mod rsi;
pub mod trend;
pub mod volume;

use std::collections::HashMap;

use common::Bar;

/// Indicator parameters by name. Missing keys fall back to the defaults in
/// [`INDICATORS`].
pub type Params = HashMap<String, f64>;

/// Result of an indicator computation.
#[derive(Debug, Clone, PartialEq)]
pub enum IndicatorOutput {
    /// Single-valued series, oldest first.
    Series(Vec<f64>),
    /// Named columns of equal length, aligned from the end.
    Frame(Frame),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Frame {
    columns: Vec<(String, Vec<f64>)>,
}

impl Frame {
    pub fn new(columns: Vec<(&str, Vec<f64>)>) -> Self {
        Self {
            columns: columns
                .into_iter()
                .map(|(name, values)| (name.to_string(), values))
                .collect(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_slice())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.columns.first().map(|(_, v)| v.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Catalogue entry: canonical name, aliases, parameter defaults, output columns.
pub struct IndicatorSpec {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub params: &'static [(&'static str, f64)],
    pub columns: &'static [&'static str],
    pub description: &'static str,
}

pub const INDICATORS: &[IndicatorSpec] = &[
    IndicatorSpec {
        name: "SMA",
        aliases: &[],
        params: &[("period", 20.0)],
        columns: &[],
        description: "simple moving average of close",
    },
    IndicatorSpec {
        name: "EMA",
        aliases: &[],
        params: &[("period", 20.0)],
        columns: &[],
        description: "exponential moving average of close",
    },
    IndicatorSpec {
        name: "RSI",
        aliases: &[],
        params: &[("period", 14.0)],
        columns: &[],
        description: "relative strength index, 0-100",
    },
    IndicatorSpec {
        name: "MACD",
        aliases: &[],
        params: &[("fast", 12.0), ("slow", 26.0), ("signal", 9.0)],
        columns: &["macd", "signal", "histogram"],
        description: "moving average convergence/divergence",
    },
    IndicatorSpec {
        name: "BB",
        aliases: &["BBANDS", "BOLL"],
        params: &[("period", 20.0), ("std", 2.0)],
        columns: &["upper", "middle", "lower"],
        description: "Bollinger bands",
    },
    IndicatorSpec {
        name: "ATR",
        aliases: &[],
        params: &[("period", 14.0)],
        columns: &[],
        description: "average true range",
    },
    IndicatorSpec {
        name: "STOCH",
        aliases: &["KD"],
        params: &[("period", 14.0), ("smooth", 3.0), ("d", 3.0)],
        columns: &["k", "d"],
        description: "stochastic oscillator, 0-100",
    },
    IndicatorSpec {
        name: "ADX",
        aliases: &[],
        params: &[("period", 14.0)],
        columns: &["adx", "plus_di", "minus_di"],
        description: "average directional index",
    },
    IndicatorSpec {
        name: "CCI",
        aliases: &[],
        params: &[("period", 20.0)],
        columns: &[],
        description: "commodity channel index",
    },
    IndicatorSpec {
        name: "OBV",
        aliases: &[],
        params: &[],
        columns: &[],
        description: "on-balance volume",
    },
    IndicatorSpec {
        name: "VWAP",
        aliases: &[],
        params: &[],
        columns: &[],
        description: "session volume-weighted average price",
    },
    IndicatorSpec {
        name: "WILLR",
        aliases: &[],
        params: &[("period", 14.0)],
        columns: &[],
        description: "Williams %R, -100-0",
    },
];

/// Look up a catalogue entry by name or alias, case-insensitively.
pub fn lookup(name: &str) -> Option<&'static IndicatorSpec> {
    let upper = name.trim().to_ascii_uppercase();
    INDICATORS
        .iter()
        .find(|spec| spec.name == upper || spec.aliases.contains(&upper.as_str()))
}

/// Compute indicator `name` over `bars` (oldest first).
///
/// Returns `None` for an unknown name, invalid parameters, or a window too
/// short to produce a single defined value.
pub fn compute(name: &str, bars: &[Bar], params: &Params) -> Option<IndicatorOutput> {
    let spec = lookup(name)?;
    let p = |key: &str| -> f64 {
        params.get(key).copied().unwrap_or_else(|| {
            spec.params
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| *v)
                .unwrap_or(0.0)
        })
    };
    let period = |key: &str| -> Option<usize> {
        let v = p(key);
        (v.is_finite() && v >= 1.0).then_some(v as usize)
    };

    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();

    let out = match spec.name {
        "SMA" => IndicatorOutput::Series(ma::sma(&closes, period("period")?)?),
        "EMA" => IndicatorOutput::Series(ma::ema(&closes, period("period")?)?),
        "RSI" => IndicatorOutput::Series(rsi::rsi(&closes, period("period")?)?),
        "MACD" => {
            let m = macd::macd(&closes, period("fast")?, period("slow")?, period("signal")?)?;
            IndicatorOutput::Frame(Frame::new(vec![
                ("macd", m.macd),
                ("signal", m.signal),
                ("histogram", m.histogram),
            ]))
        }
        "BB" => {
            let b = bands::bollinger(&closes, period("period")?, p("std"))?;
            IndicatorOutput::Frame(Frame::new(vec![
                ("upper", b.upper),
                ("middle", b.middle),
                ("lower", b.lower),
            ]))
        }
        "ATR" => IndicatorOutput::Series(trend::atr(bars, period("period")?)?),
        "STOCH" => {
            let s = oscillators::stoch(bars, period("period")?, period("smooth")?, period("d")?)?;
            IndicatorOutput::Frame(Frame::new(vec![("k", s.k), ("d", s.d)]))
        }
        "ADX" => {
            let a = trend::adx(bars, period("period")?)?;
            IndicatorOutput::Frame(Frame::new(vec![
                ("adx", a.adx),
                ("plus_di", a.plus_di),
                ("minus_di", a.minus_di),
            ]))
        }
        "CCI" => IndicatorOutput::Series(oscillators::cci(bars, period("period")?)?),
        "OBV" => IndicatorOutput::Series(volume::obv(bars)?),
        "VWAP" => IndicatorOutput::Series(volume::vwap(bars)?),
        "WILLR" => IndicatorOutput::Series(oscillators::willr(bars, period("period")?)?),
        _ => return None,
    };
    Some(out)
}

/// Markdown table of every indicator, its parameters and outputs.
pub fn catalogue_table() -> String {
    let mut out = String::from("| name | params (defaults) | output |\n|---|---|---|\n");
    for spec in INDICATORS {
        let params = if spec.params.is_empty() {
            "none".to_string()
        } else {
            spec.params
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(", ")
        };
        let output = if spec.columns.is_empty() {
            "series".to_string()
        } else {
            spec.columns
                .iter()
                .map(|c| format!(".{c}"))
                .collect::<Vec<_>>()
                .join(" ")
        };
        let name = if spec.aliases.is_empty() {
            spec.name.to_string()
        } else {
            format!("{} ({})", spec.name, spec.aliases.join(", "))
        };
        out.push_str(&format!(
            "| {name} | {params} | {output} ({}) |\n",
            spec.description
        ));
    }
    out
}

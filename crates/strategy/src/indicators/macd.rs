use super::ma::{ema, tail};

/// MACD (Moving Average Convergence/Divergence) columns, aligned from the end.
///
/// MACD line = EMA(fast) − EMA(slow), Signal = EMA(macd_line, signal),
/// Histogram = MACD − Signal.
#[derive(Debug, Clone, PartialEq)]
pub struct MacdOutput {
    pub macd: Vec<f64>,
    pub signal: Vec<f64>,
    pub histogram: Vec<f64>,
}

/// Needs at least `max(fast, slow) + signal - 1` closes.
pub fn macd(closes: &[f64], fast: usize, slow: usize, signal: usize) -> Option<MacdOutput> {
    let fast_ema = ema(closes, fast)?;
    let slow_ema = ema(closes, slow)?;

    let len = fast_ema.len().min(slow_ema.len());
    let macd_line: Vec<f64> = tail(&fast_ema, len)
        .iter()
        .zip(tail(&slow_ema, len))
        .map(|(f, s)| f - s)
        .collect();

    let signal_line = ema(&macd_line, signal)?;
    let macd_line = tail(&macd_line, signal_line.len());
    let histogram = macd_line
        .iter()
        .zip(&signal_line)
        .map(|(m, s)| m - s)
        .collect();

    Some(MacdOutput {
        macd: macd_line,
        signal: signal_line,
        histogram,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trending_up(n: usize) -> Vec<f64> {
        (0..n).map(|i| 100.0 + i as f64 * 0.5).collect()
    }

    #[test]
    fn macd_returns_none_with_insufficient_data() {
        let prices = vec![100.0; 30]; // need >= 34
        assert!(macd(&prices, 12, 26, 9).is_none());
    }

    #[test]
    fn macd_columns_are_aligned() {
        let prices: Vec<f64> = (0..60).map(|i| 100.0 + i as f64).collect();
        let out = macd(&prices, 12, 26, 9).unwrap();
        assert_eq!(out.macd.len(), 60 - 26 - 9 + 2);
        assert_eq!(out.macd.len(), out.signal.len());
        assert_eq!(out.signal.len(), out.histogram.len());
    }

    #[test]
    fn macd_positive_on_steady_uptrend() {
        let out = macd(&trending_up(60), 3, 6, 3).unwrap();
        assert!(*out.macd.last().unwrap() > 0.0);
    }

    #[test]
    fn macd_crosses_up_after_reversal() {
        // Down then sharply up: MACD flips sign, histogram turns positive.
        let mut prices: Vec<f64> = (0..20).map(|i| 100.0 - i as f64 * 0.5).collect();
        prices.extend((0..20).map(|i| 90.0 + i as f64 * 2.0));
        let out = macd(&prices, 3, 6, 3).unwrap();
        assert!(out.macd[0] < 0.0);
        assert!(*out.macd.last().unwrap() > 0.0);
        assert!(out.histogram.iter().any(|h| *h > 0.1));
    }
}

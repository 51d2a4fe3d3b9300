use common::Bar;

use super::ma::{sma, tail};

/// Stochastic oscillator, slow form: %K is the `smooth`-bar SMA of the raw
/// value, %D the `d`-bar SMA of %K.
#[derive(Debug, Clone, PartialEq)]
pub struct StochOutput {
    pub k: Vec<f64>,
    pub d: Vec<f64>,
}

pub fn stoch(bars: &[Bar], period: usize, smooth: usize, d: usize) -> Option<StochOutput> {
    let raw = range_position(bars, period)?;
    let k = sma(&raw, smooth)?;
    let d = sma(&k, d)?;
    Some(StochOutput {
        k: tail(&k, d.len()),
        d,
    })
}

/// Williams %R in `[-100, 0]`.
pub fn willr(bars: &[Bar], period: usize) -> Option<Vec<f64>> {
    Some(range_position(bars, period)?.into_iter().map(|p| p - 100.0).collect())
}

/// Commodity Channel Index over the typical price.
pub fn cci(bars: &[Bar], period: usize) -> Option<Vec<f64>> {
    if period == 0 || bars.len() < period {
        return None;
    }
    let tp: Vec<f64> = bars.iter().map(Bar::typical_price).collect();
    Some(
        tp.windows(period)
            .map(|w| {
                let mean = w.iter().sum::<f64>() / period as f64;
                let mean_dev = w.iter().map(|v| (v - mean).abs()).sum::<f64>() / period as f64;
                let last = w[period - 1];
                if mean_dev == 0.0 {
                    0.0
                } else {
                    (last - mean) / (0.015 * mean_dev)
                }
            })
            .collect(),
    )
}

/// Where the close sits inside the `period`-bar high/low range, 0..=100.
/// A zero-width range reads as the midpoint.
fn range_position(bars: &[Bar], period: usize) -> Option<Vec<f64>> {
    if period == 0 || bars.len() < period {
        return None;
    }
    Some(
        bars.windows(period)
            .map(|w| {
                let hh = w.iter().map(|b| b.high).fold(f64::MIN, f64::max);
                let ll = w.iter().map(|b| b.low).fold(f64::MAX, f64::min);
                let close = w[period - 1].close;
                if hh > ll {
                    (close - ll) / (hh - ll) * 100.0
                } else {
                    50.0
                }
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn bars(closes: &[f64]) -> Vec<Bar> {
        closes
            .iter()
            .map(|&c| Bar {
                timestamp: Utc::now(),
                open: c,
                high: c + 1.0,
                low: c - 1.0,
                close: c,
                volume: 1.0,
            })
            .collect()
    }

    #[test]
    fn stoch_lengths_align() {
        let closes: Vec<f64> = (0..30).map(|i| 100.0 + (i as f64).sin()).collect();
        let out = stoch(&bars(&closes), 14, 3, 3).unwrap();
        assert_eq!(out.k.len(), out.d.len());
        assert_eq!(out.d.len(), 30 - 14 + 1 - 2 - 2);
    }

    #[test]
    fn willr_at_range_top_is_zero_ish() {
        let closes: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let last = *willr(&bars(&closes), 14).unwrap().last().unwrap();
        // close = hh - 1 inside a 15-wide range
        assert!(last > -10.0 && last <= 0.0, "got {last}");
    }

    #[test]
    fn cci_zero_on_flat() {
        let out = cci(&bars(&[5.0; 25]), 20).unwrap();
        assert!(out.iter().all(|v| *v == 0.0));
    }
}

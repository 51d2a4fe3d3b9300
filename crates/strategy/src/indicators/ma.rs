//! Moving averages and the smoothing helpers shared by the other indicators.
//!
//! Every function returns only defined values: the first element corresponds
//! to the first bar where the average is complete. Callers align outputs from
//! the end.

/// Simple moving average. Length `n - period + 1`.
pub fn sma(values: &[f64], period: usize) -> Option<Vec<f64>> {
    if period == 0 || values.len() < period {
        return None;
    }
    let mut out = Vec::with_capacity(values.len() - period + 1);
    let mut sum: f64 = values[..period].iter().sum();
    out.push(sum / period as f64);
    for i in period..values.len() {
        sum += values[i] - values[i - period];
        out.push(sum / period as f64);
    }
    Some(out)
}

/// Exponential moving average seeded with the SMA of the first `period` values.
pub fn ema(values: &[f64], period: usize) -> Option<Vec<f64>> {
    let k = 2.0 / (period as f64 + 1.0);
    smooth(values, period, k)
}

/// Wilder's running moving average (alpha = 1 / period), SMA-seeded.
pub fn rma(values: &[f64], period: usize) -> Option<Vec<f64>> {
    smooth(values, period, 1.0 / period as f64)
}

fn smooth(values: &[f64], period: usize, alpha: f64) -> Option<Vec<f64>> {
    if period == 0 || values.len() < period {
        return None;
    }
    let mut out = Vec::with_capacity(values.len() - period + 1);
    let mut current = values[..period].iter().sum::<f64>() / period as f64;
    out.push(current);
    for &v in &values[period..] {
        current = v * alpha + current * (1.0 - alpha);
        out.push(current);
    }
    Some(out)
}

/// Population standard deviation over each rolling window.
pub fn rolling_std(values: &[f64], period: usize) -> Option<Vec<f64>> {
    if period == 0 || values.len() < period {
        return None;
    }
    Some(
        values
            .windows(period)
            .map(|w| {
                let mean = w.iter().sum::<f64>() / period as f64;
                let var = w.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / period as f64;
                var.sqrt()
            })
            .collect(),
    )
}

/// Keep the last `len` elements of `values`.
pub(crate) fn tail(values: &[f64], len: usize) -> Vec<f64> {
    values[values.len().saturating_sub(len)..].to_vec()
}

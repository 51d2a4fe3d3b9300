//! Deterministic bar series for offline runs and tests.

use chrono::{DateTime, Duration, TimeZone, Utc};

use common::Bar;

/// Default start: a Monday morning session, 15-minute bars.
pub fn default_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 8, 0, 45, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Bars whose open is the previous close, with a small high/low spread.
pub fn from_closes(closes: &[f64], start: DateTime<Utc>, step_secs: i64) -> Vec<Bar> {
    let mut prev = closes.first().copied().unwrap_or_default();
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = prev;
            prev = close;
            let spread = close.abs() * 0.0005;
            Bar {
                timestamp: start + Duration::seconds(step_secs * i as i64),
                open,
                high: open.max(close) + spread,
                low: open.min(close) - spread,
                close,
                volume: 1_000.0 + (i % 7) as f64 * 50.0,
            }
        })
        .collect()
}

/// `n` bars with a constant close.
pub fn flat(n: usize, price: f64) -> Vec<Bar> {
    from_closes(&vec![price; n], default_start(), 900)
}

/// Sine oscillation around `base`.
pub fn sine_wave(n: usize, base: f64, amplitude: f64, period: f64) -> Vec<Bar> {
    let closes: Vec<f64> = (0..n)
        .map(|i| base + amplitude * (2.0 * std::f64::consts::PI * i as f64 / period.max(1.0)).sin())
        .collect();
    from_closes(&closes, default_start(), 900)
}

/// Barely moving market: alternating ±`tick` around `base`.
pub fn quiet(n: usize, base: f64, tick: f64) -> Vec<Bar> {
    let closes: Vec<f64> = (0..n)
        .map(|i| if i % 2 == 0 { base } else { base + tick })
        .collect();
    from_closes(&closes, default_start(), 900)
}

/// 100 bars: a calm stretch, a slide into a sell-off, a choppy recovery, a
/// strong rally, then calm.
///
/// RSI(14) first dips below 30 at the bottom of the sell-off (bar 46) and
/// first rises above 70 two bars into the rally (bar 72), so a simple RSI
/// reversal program buys after bar 40, closes after bar 70 and trades once.
pub fn rsi_dip_rally() -> Vec<Bar> {
    let mut closes = Vec::with_capacity(100);
    let mut price = 100.0;
    for i in 0..100 {
        let up = i % 2 == 0;
        match i {
            0..=39 => price = if up { 100.0 } else { 100.2 },
            40..=43 => price += if up { -1.0 } else { 0.6 },
            44..=47 => price -= 1.0,
            48..=69 => price += if up { 1.2 } else { -0.6 },
            70..=79 => price += 1.5,
            _ => price += if up { 0.2 } else { -0.2 },
        }
        closes.push(price);
    }
    from_closes(&closes, default_start(), 900)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_closes_links_opens_to_previous_close() {
        let bars = from_closes(&[1.0, 2.0, 3.0], default_start(), 60);
        assert_eq!(bars[1].open, 1.0);
        assert_eq!(bars[2].open, 2.0);
        assert_eq!(bars[2].timestamp - bars[0].timestamp, Duration::seconds(120));
        assert!(bars.iter().all(|b| b.low <= b.close && b.close <= b.high));
    }

    #[test]
    fn dip_rally_shape() {
        let bars = rsi_dip_rally();
        assert_eq!(bars.len(), 100);
        let low = bars.iter().map(|b| b.close).fold(f64::MAX, f64::min);
        let high = bars.iter().map(|b| b.close).fold(f64::MIN, f64::max);
        assert!((low - 95.4).abs() < 1e-9, "{low}");
        assert!((bars[47].close - low).abs() < 1e-9);
        assert!((high - 117.2).abs() < 1e-9, "{high}");
    }
}

use common::Bar;

/// On-Balance Volume, seeded with the first bar's volume.
pub fn obv(bars: &[Bar]) -> Option<Vec<f64>> {
    let first = bars.first()?;
    let mut out = Vec::with_capacity(bars.len());
    let mut acc = first.volume;
    out.push(acc);
    for w in bars.windows(2) {
        if w[1].close > w[0].close {
            acc += w[1].volume;
        } else if w[1].close < w[0].close {
            acc -= w[1].volume;
        }
        out.push(acc);
    }
    Some(out)
}

/// Session VWAP over the typical price, reset at each UTC date change.
pub fn vwap(bars: &[Bar]) -> Option<Vec<f64>> {
    bars.first()?;
    let mut out = Vec::with_capacity(bars.len());
    let mut pv = 0.0;
    let mut vol = 0.0;
    let mut session = None;
    for b in bars {
        let day = b.timestamp.date_naive();
        if session != Some(day) {
            session = Some(day);
            pv = 0.0;
            vol = 0.0;
        }
        pv += b.typical_price() * b.volume;
        vol += b.volume;
        out.push(if vol > 0.0 { pv / vol } else { b.typical_price() });
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn bar(day: u32, close: f64, volume: f64) -> Bar {
        Bar {
            timestamp: Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap(),
            open: close,
            high: close,
            low: close,
            close,
            volume,
        }
    }

    #[test]
    fn obv_accumulates_by_direction() {
        let bars = vec![bar(1, 10.0, 5.0), bar(1, 11.0, 3.0), bar(1, 10.5, 2.0), bar(1, 10.5, 9.0)];
        assert_eq!(obv(&bars).unwrap(), vec![5.0, 8.0, 6.0, 6.0]);
    }

    #[test]
    fn vwap_resets_each_day() {
        let bars = vec![bar(1, 10.0, 1.0), bar(1, 20.0, 1.0), bar(2, 30.0, 1.0)];
        assert_eq!(vwap(&bars).unwrap(), vec![10.0, 15.0, 30.0]);
    }

    #[test]
    fn empty_input_is_none() {
        assert!(obv(&[]).is_none());
        assert!(vwap(&[]).is_none());
    }
}

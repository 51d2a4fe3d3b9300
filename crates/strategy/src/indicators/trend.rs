use common::Bar;

use super::ma::{rma, tail};

/// True range; the first bar has no previous close and uses high − low.
fn true_range(bars: &[Bar]) -> Vec<f64> {
    bars.iter()
        .enumerate()
        .map(|(i, b)| {
            let hl = b.high - b.low;
            match i {
                0 => hl,
                _ => {
                    let pc = bars[i - 1].close;
                    hl.max((b.high - pc).abs()).max((b.low - pc).abs())
                }
            }
        })
        .collect()
}

/// Average True Range with Wilder smoothing. Needs `period + 1` bars.
pub fn atr(bars: &[Bar], period: usize) -> Option<Vec<f64>> {
    if bars.len() < period + 1 {
        return None;
    }
    rma(&true_range(bars)[1..], period)
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdxOutput {
    pub adx: Vec<f64>,
    pub plus_di: Vec<f64>,
    pub minus_di: Vec<f64>,
}

/// Average Directional Index. Needs `2 * period` bars.
pub fn adx(bars: &[Bar], period: usize) -> Option<AdxOutput> {
    if period == 0 || bars.len() < 2 * period {
        return None;
    }

    let mut plus_dm = Vec::with_capacity(bars.len() - 1);
    let mut minus_dm = Vec::with_capacity(bars.len() - 1);
    for w in bars.windows(2) {
        let up_move = w[1].high - w[0].high;
        let down_move = w[0].low - w[1].low;
        plus_dm.push(if up_move > down_move && up_move > 0.0 { up_move } else { 0.0 });
        minus_dm.push(if down_move > up_move && down_move > 0.0 { down_move } else { 0.0 });
    }

    let tr = rma(&true_range(bars)[1..], period)?;
    let plus = rma(&plus_dm, period)?;
    let minus = rma(&minus_dm, period)?;

    let plus_di: Vec<f64> = plus
        .iter()
        .zip(&tr)
        .map(|(p, t)| if *t == 0.0 { 0.0 } else { 100.0 * p / t })
        .collect();
    let minus_di: Vec<f64> = minus
        .iter()
        .zip(&tr)
        .map(|(m, t)| if *t == 0.0 { 0.0 } else { 100.0 * m / t })
        .collect();
    let dx: Vec<f64> = plus_di
        .iter()
        .zip(&minus_di)
        .map(|(p, m)| {
            let sum = p + m;
            if sum == 0.0 {
                0.0
            } else {
                100.0 * (p - m).abs() / sum
            }
        })
        .collect();

    let adx = rma(&dx, period)?;
    Some(AdxOutput {
        plus_di: tail(&plus_di, adx.len()),
        minus_di: tail(&minus_di, adx.len()),
        adx,
    })
}

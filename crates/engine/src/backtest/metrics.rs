use chrono::{DateTime, Utc};
use serde::Serialize;

use common::{Bar, Fill, OrderSide};

/// Point value and fixed cost per side for a futures symbol.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContractSpec {
    pub point_value: f64,
    pub cost_per_side: f64,
}

pub fn contract_spec(symbol: &str) -> ContractSpec {
    let (point_value, cost_per_side) = match symbol {
        "TXF" => (200.0, 40.0),
        "MXF" => (50.0, 20.0),
        "TMF" => (10.0, 14.0),
        _ => (1.0, 0.0),
    };
    ContractSpec {
        point_value,
        cost_per_side,
    }
}

/// One round trip.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trade {
    /// Side of the opening fill.
    pub side: OrderSide,
    pub quantity: i64,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_price: f64,
    /// Net of both sides' costs.
    pub pnl: f64,
    /// Price move in the trade's favour, percent of entry.
    pub return_pct: f64,
    /// Closed by the end of the data rather than by a signal.
    pub forced_exit: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub equity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BacktestMetrics {
    pub trade_count: usize,
    pub won_trades: usize,
    pub lost_trades: usize,
    pub win_rate: f64,
    pub total_pnl: f64,
    pub avg_trade: f64,
    pub total_commission: f64,
    pub total_return: f64,
    pub max_drawdown: f64,
    pub sharpe_ratio: f64,
    pub sqn: f64,
    /// Infinite with only winners, zero with no P&L at all.
    pub profit_factor: f64,
    pub best_trade: f64,
    pub worst_trade: f64,
}

struct OpenTrade {
    side: OrderSide,
    quantity: i64,
    entry_time: DateTime<Utc>,
    entry_price: f64,
}

impl OpenTrade {
    fn gross(&self, price: f64, spec: ContractSpec) -> f64 {
        (price - self.entry_price) * self.side.sign() as f64 * self.quantity as f64 * spec.point_value
    }

    fn close(self, time: DateTime<Utc>, price: f64, spec: ContractSpec, forced_exit: bool) -> Trade {
        let return_pct = if self.entry_price == 0.0 {
            0.0
        } else {
            (price - self.entry_price) / self.entry_price * self.side.sign() as f64 * 100.0
        };
        Trade {
            side: self.side,
            quantity: self.quantity,
            entry_time: self.entry_time,
            exit_time: time,
            entry_price: self.entry_price,
            exit_price: price,
            pnl: self.gross(price, spec) - 2.0 * spec.cost_per_side,
            return_pct,
            forced_exit,
        }
    }
}

/// Pair fills into trades and mark equity to market on every bar.
///
/// Fills are matched to bars by timestamp. A position still open after the
/// last bar is closed at its close.
pub fn simulate(
    bars: &[Bar],
    fills: &[Fill],
    spec: ContractSpec,
    initial_capital: f64,
) -> (Vec<Trade>, Vec<EquityPoint>) {
    let mut trades = Vec::new();
    let mut equity = Vec::with_capacity(bars.len());
    let mut cash = initial_capital;
    let mut open: Option<OpenTrade> = None;
    let mut fills = fills.iter().peekable();

    for bar in bars {
        while let Some(fill) = fills.next_if(|f| f.timestamp <= bar.timestamp) {
            cash -= spec.cost_per_side;
            match open.take() {
                None => {
                    open = Some(OpenTrade {
                        side: fill.side,
                        quantity: fill.quantity,
                        entry_time: fill.timestamp,
                        entry_price: fill.price,
                    })
                }
                Some(position) => {
                    cash += position.gross(fill.price, spec);
                    trades.push(position.close(fill.timestamp, fill.price, spec, false));
                }
            }
        }
        let marked = open.as_ref().map_or(0.0, |o| o.gross(bar.close, spec));
        equity.push(EquityPoint {
            timestamp: bar.timestamp,
            equity: cash + marked,
        });
    }

    if let (Some(position), Some(last)) = (open, bars.last()) {
        cash += position.gross(last.close, spec) - spec.cost_per_side;
        trades.push(position.close(last.timestamp, last.close, spec, true));
        if let Some(point) = equity.last_mut() {
            point.equity = cash;
        }
    }

    (trades, equity)
}

pub fn compute_metrics(
    trades: &[Trade],
    equity: &[EquityPoint],
    initial_capital: f64,
    spec: ContractSpec,
    bars_per_day: u32,
) -> BacktestMetrics {
    let trade_count = trades.len();
    let won_trades = trades.iter().filter(|t| t.pnl > 0.0).count();
    let total_pnl: f64 = trades.iter().map(|t| t.pnl).sum();
    let final_equity = equity.last().map_or(initial_capital, |p| p.equity);
    let returns: Vec<f64> = trades.iter().map(|t| t.return_pct).collect();

    let per_bar: Vec<f64> = equity
        .windows(2)
        .filter(|w| w[0].equity != 0.0)
        .map(|w| w[1].equity / w[0].equity - 1.0)
        .collect();
    let sharpe_ratio = ratio(&per_bar).map_or(0.0, |r| r * (bars_per_day as f64 * 252.0).sqrt());
    let sqn = ratio(&returns).map_or(0.0, |r| r * (trade_count as f64).sqrt());

    BacktestMetrics {
        trade_count,
        won_trades,
        lost_trades: trade_count - won_trades,
        win_rate: if trade_count == 0 {
            0.0
        } else {
            won_trades as f64 / trade_count as f64 * 100.0
        },
        total_pnl,
        avg_trade: if trade_count == 0 { 0.0 } else { total_pnl / trade_count as f64 },
        total_commission: trade_count as f64 * 2.0 * spec.cost_per_side,
        total_return: if initial_capital == 0.0 {
            0.0
        } else {
            (final_equity - initial_capital) / initial_capital * 100.0
        },
        max_drawdown: max_drawdown(equity),
        sharpe_ratio,
        sqn,
        profit_factor: profit_factor(trades),
        best_trade: returns.iter().copied().reduce(f64::max).unwrap_or(0.0),
        worst_trade: returns.iter().copied().reduce(f64::min).unwrap_or(0.0),
    }
}

/// Largest peak-to-trough fall, percent of the peak.
pub fn max_drawdown(equity: &[EquityPoint]) -> f64 {
    let mut peak = f64::MIN;
    let mut worst = 0.0_f64;
    for point in equity {
        peak = peak.max(point.equity);
        if peak > 0.0 {
            worst = worst.max((peak - point.equity) / peak * 100.0);
        }
    }
    worst
}

pub fn profit_factor(trades: &[Trade]) -> f64 {
    let gross_profit: f64 = trades.iter().map(|t| t.pnl).filter(|p| *p > 0.0).sum();
    let gross_loss: f64 = trades.iter().map(|t| t.pnl).filter(|p| *p < 0.0).sum::<f64>().abs();
    if gross_loss > 0.0 {
        gross_profit / gross_loss
    } else if gross_profit > 0.0 {
        f64::INFINITY
    } else {
        0.0
    }
}

pub fn sqn_rating(sqn: f64) -> &'static str {
    match sqn {
        s if s >= 7.0 => "Holy Grail",
        s if s >= 5.0 => "Superb",
        s if s >= 3.0 => "Excellent",
        s if s >= 2.5 => "Good",
        s if s >= 2.0 => "Average",
        s if s >= 1.6 => "Below Average",
        _ => "Poor",
    }
}

/// mean / sample stdev, if defined.
fn ratio(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let sd = var.sqrt();
    (sd > 0.0 && sd.is_finite()).then(|| mean / sd)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn bars(closes: &[f64]) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Bar {
                timestamp: start + Duration::minutes(15 * i as i64),
                open: c,
                high: c,
                low: c,
                close: c,
                volume: 1.0,
            })
            .collect()
    }

    fn fill(bar: &Bar, side: OrderSide) -> Fill {
        Fill {
            symbol: "TXF".into(),
            side,
            price: bar.close,
            quantity: 1,
            timestamp: bar.timestamp,
        }
    }

    #[test]
    fn txf_round_trip_is_net_of_both_sides() {
        let b = bars(&[100.0, 101.0, 110.0, 110.0]);
        let fills = [fill(&b[0], OrderSide::Buy), fill(&b[2], OrderSide::Sell)];
        let spec = contract_spec("TXF");
        let (trades, equity) = simulate(&b, &fills, spec, 1_000_000.0);

        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].pnl, 10.0 * 200.0 - 80.0);
        assert!(!trades[0].forced_exit);
        assert!((trades[0].return_pct - 10.0).abs() < 1e-9);
        // Entry cost is paid at the entry bar.
        assert_eq!(equity[0].equity, 1_000_000.0 - 40.0);
        assert_eq!(equity[1].equity, 1_000_000.0 - 40.0 + 200.0);
        assert_eq!(equity[3].equity, 1_000_000.0 + 1920.0);
    }

    #[test]
    fn open_short_is_closed_at_the_last_bar() {
        let b = bars(&[100.0, 95.0, 90.0]);
        let fills = [fill(&b[0], OrderSide::Sell)];
        let (trades, equity) = simulate(&b, &fills, contract_spec("OTHER"), 1_000.0);
        assert_eq!(trades.len(), 1);
        assert!(trades[0].forced_exit);
        assert_eq!(trades[0].pnl, 10.0);
        assert_eq!(equity.last().unwrap().equity, 1_010.0);
    }

    #[test]
    fn profit_factor_edges() {
        let t = |pnl: f64| Trade {
            side: OrderSide::Buy,
            quantity: 1,
            entry_time: Utc::now(),
            exit_time: Utc::now(),
            entry_price: 1.0,
            exit_price: 1.0,
            pnl,
            return_pct: 0.0,
            forced_exit: false,
        };
        assert_eq!(profit_factor(&[t(10.0), t(5.0)]), f64::INFINITY);
        assert_eq!(profit_factor(&[]), 0.0);
        assert_eq!(profit_factor(&[t(30.0), t(-10.0)]), 3.0);
    }

    #[test]
    fn sqn_bands() {
        assert_eq!(sqn_rating(7.0), "Holy Grail");
        assert_eq!(sqn_rating(2.5), "Good");
        assert_eq!(sqn_rating(1.6), "Below Average");
        assert_eq!(sqn_rating(-1.0), "Poor");
    }

    #[test]
    fn drawdown_is_measured_from_the_peak() {
        let b = bars(&[0.0, 0.0, 0.0, 0.0]);
        let curve: Vec<EquityPoint> = [100.0, 120.0, 90.0, 130.0]
            .iter()
            .zip(&b)
            .map(|(&equity, bar)| EquityPoint {
                timestamp: bar.timestamp,
                equity,
            })
            .collect();
        assert!((max_drawdown(&curve) - 25.0).abs() < 1e-9);
    }

    #[test]
    fn no_trades_gives_zeroed_metrics() {
        let b = bars(&[100.0, 100.0, 100.0]);
        let (trades, equity) = simulate(&b, &[], contract_spec("TXF"), 1_000.0);
        let m = compute_metrics(&trades, &equity, 1_000.0, contract_spec("TXF"), 96);
        assert_eq!(m.trade_count, 0);
        assert_eq!(m.win_rate, 0.0);
        assert_eq!(m.sharpe_ratio, 0.0);
        assert_eq!(m.profit_factor, 0.0);
        assert_eq!(m.total_return, 0.0);
    }
}

use std::fmt::Write;

use chrono::{DateTime, Utc};

use super::metrics::{sqn_rating, BacktestMetrics};

const RULE: &str = "==========================================";
const THIN_RULE: &str = "------------------------------------------";

/// Header facts shown above the metrics.
pub struct ReportHeader<'a> {
    pub unit_name: &'a str,
    pub symbol: &'a str,
    pub timeframe: &'a str,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub lookback_days: u32,
    pub initial_capital: f64,
}

pub fn format_report(header: &ReportHeader<'_>, m: &BacktestMetrics) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Backtest report ({})", header.unit_name);
    let _ = writeln!(out, "{RULE}");
    let _ = writeln!(out, "Symbol:          {} {}", header.symbol, header.timeframe);
    let _ = writeln!(
        out,
        "Period:          {} ~ {} ({} days)",
        header.start.format("%Y-%m-%d"),
        header.end.format("%Y-%m-%d"),
        header.lookback_days
    );
    let _ = writeln!(out, "Initial capital: {}", money(header.initial_capital, false));
    let _ = writeln!(out, "{THIN_RULE}");
    let _ = writeln!(
        out,
        "Total P&L:       {} ({:+.1}%)",
        money(m.total_pnl, true),
        m.total_return
    );
    let _ = writeln!(out, "Max drawdown:    {:.1}%", m.max_drawdown);
    let _ = writeln!(out, "Sharpe ratio:    {:.2}", m.sharpe_ratio);
    let _ = writeln!(out, "SQN:             {:.2} ({})", m.sqn, sqn_rating(m.sqn));
    let _ = writeln!(out, "Trades:          {}", m.trade_count);
    let _ = writeln!(out, "Won:             {}", m.won_trades);
    let _ = writeln!(out, "Lost:            {}", m.lost_trades);
    let _ = writeln!(out, "Win rate:        {:.1}%", m.win_rate);
    let _ = writeln!(out, "Profit factor:   {}", factor(m.profit_factor));
    let _ = writeln!(out, "Avg trade:       {}", money(m.avg_trade, true));
    let _ = writeln!(out, "Commission:      -{}", money(m.total_commission, false));
    let _ = writeln!(out, "Best trade:      {:+.1}%", m.best_trade);
    let _ = writeln!(out, "Worst trade:     {:+.1}%", m.worst_trade);
    let _ = writeln!(out, "{THIN_RULE}");
    out.push_str("Past performance does not guarantee future results.");
    out
}

/// Plain-language reading of the metrics, one paragraph per aspect.
pub fn narrative(m: &BacktestMetrics) -> String {
    let summary = if m.total_pnl > 0.0 {
        format!("The strategy made {} over the test period.", money(m.total_pnl, true))
    } else if m.total_pnl == 0.0 {
        "The strategy broke even over the test period.".to_string()
    } else {
        format!("The strategy lost {} over the test period.", money(m.total_pnl.abs(), false))
    };

    let risk = if m.max_drawdown > 15.0 {
        format!("Max drawdown reached {:.1}%: high risk.", m.max_drawdown)
    } else if m.max_drawdown > 10.0 {
        format!("Max drawdown of {:.1}%: moderate risk.", m.max_drawdown)
    } else {
        format!("Max drawdown held to {:.1}%: risk is well controlled.", m.max_drawdown)
    };

    let stability = if m.sharpe_ratio > 1.5 {
        format!("Sharpe ratio {:.2}: excellent risk-adjusted return.", m.sharpe_ratio)
    } else if m.sharpe_ratio > 1.0 {
        format!("Sharpe ratio {:.2}: fair risk-adjusted return.", m.sharpe_ratio)
    } else if m.sharpe_ratio > 0.0 {
        format!("Sharpe ratio {:.2}: weak risk-adjusted return.", m.sharpe_ratio)
    } else {
        format!("Sharpe ratio {:.2}: the strategy is not stable.", m.sharpe_ratio)
    };

    let frequency = match m.trade_count {
        0 => "No trades were made; the entry conditions may be too strict.".to_string(),
        n if n < 5 => format!("Only {n} trades; the strategy may be too conservative."),
        n if n > 50 => format!("{n} trades; the strategy may be overtrading."),
        n => format!("{n} trades, a reasonable frequency."),
    };

    let win = if m.win_rate > 60.0 {
        format!("Win rate {:.1}%: strong.", m.win_rate)
    } else if m.win_rate > 50.0 {
        format!("Win rate {:.1}%: slightly better than even.", m.win_rate)
    } else {
        format!("Win rate {:.1}%: low.", m.win_rate)
    };

    let pf = if m.profit_factor > 1.5 {
        format!("Profit factor {}: winners clearly outweigh losers.", factor(m.profit_factor))
    } else if m.profit_factor > 1.0 {
        format!("Profit factor {}: roughly break-even.", factor(m.profit_factor))
    } else {
        format!("Profit factor {}: losers outweigh winners.", factor(m.profit_factor))
    };

    let commission = format!(
        "Transaction costs over the period: {}.",
        money(m.total_commission, false)
    );

    [
        summary,
        format!("Risk\n{risk}"),
        format!("Stability\n{stability}"),
        format!("Trade frequency\n{frequency}"),
        format!("Win rate\n{win}"),
        format!("Profit factor\n{pf}"),
        format!("Costs\n{commission}"),
        "---\nPast performance does not guarantee future results. Assess the risk carefully before trading live.".to_string(),
    ]
    .join("\n\n")
}

fn factor(pf: f64) -> String {
    if pf.is_infinite() {
        "inf".to_string()
    } else {
        format!("{pf:.2}")
    }
}

/// Whole units with thousands separators.
fn money(value: f64, signed: bool) -> String {
    let rounded = value.round();
    let digits = format!("{:.0}", rounded.abs());
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    let sign = if rounded < 0.0 {
        "-"
    } else if signed {
        "+"
    } else {
        ""
    };
    format!("{sign}{grouped}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn metrics() -> BacktestMetrics {
        BacktestMetrics {
            trade_count: 12,
            won_trades: 8,
            lost_trades: 4,
            win_rate: 66.7,
            total_pnl: 123_456.0,
            avg_trade: 10_288.0,
            total_commission: 960.0,
            total_return: 12.3,
            max_drawdown: 12.5,
            sharpe_ratio: 1.2,
            sqn: 2.6,
            profit_factor: f64::INFINITY,
            best_trade: 3.25,
            worst_trade: -1.5,
        }
    }

    #[test]
    fn money_groups_thousands() {
        assert_eq!(money(1_234_567.4, false), "1,234,567");
        assert_eq!(money(950.0, true), "+950");
        assert_eq!(money(-12_000.0, true), "-12,000");
        assert_eq!(money(0.0, false), "0");
    }

    #[test]
    fn report_lists_every_metric() {
        let header = ReportHeader {
            unit_name: "RsiReversal",
            symbol: "TXF",
            timeframe: "15m",
            start: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap(),
            lookback_days: 30,
            initial_capital: 1_000_000.0,
        };
        let text = format_report(&header, &metrics());
        for expected in [
            "Backtest report (RsiReversal)",
            "2024-01-02 ~ 2024-02-01 (30 days)",
            "Initial capital: 1,000,000",
            "Total P&L:       +123,456 (+12.3%)",
            "SQN:             2.60 (Good)",
            "Profit factor:   inf",
            "Commission:      -960",
            "Worst trade:     -1.5%",
        ] {
            assert!(text.contains(expected), "missing {expected:?} in\n{text}");
        }
    }

    #[test]
    fn narrative_picks_bands() {
        let text = narrative(&metrics());
        assert!(text.contains("moderate risk"));
        assert!(text.contains("fair risk-adjusted"));
        assert!(text.contains("12 trades, a reasonable frequency"));
        assert!(text.contains("Win rate 66.7%: strong"));
        assert!(text.contains("winners clearly outweigh"));

        let mut idle = metrics();
        idle.trade_count = 0;
        idle.total_pnl = 0.0;
        let text = narrative(&idle);
        assert!(text.contains("broke even"));
        assert!(text.contains("No trades were made"));
    }
}

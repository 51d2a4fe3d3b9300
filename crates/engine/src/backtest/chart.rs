use std::fmt::Write;

use super::metrics::{EquityPoint, Trade};

const WIDTH: f64 = 960.0;
const HEIGHT: f64 = 420.0;
const MARGIN: f64 = 48.0;

/// Equity curve as a standalone SVG document, with entry and exit markers.
pub fn equity_svg(title: &str, equity: &[EquityPoint], trades: &[Trade], initial_capital: f64) -> String {
    let mut svg = String::new();
    let _ = writeln!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{WIDTH}" height="{HEIGHT}" viewBox="0 0 {WIDTH} {HEIGHT}">"#
    );
    let _ = writeln!(svg, r##"<rect width="100%" height="100%" fill="#ffffff"/>"##);
    let _ = writeln!(
        svg,
        r##"<text x="{MARGIN}" y="28" font-family="sans-serif" font-size="16" fill="#222">{}</text>"##,
        escape(title)
    );

    if equity.is_empty() {
        let _ = writeln!(
            svg,
            r##"<text x="{MARGIN}" y="{}" font-family="sans-serif" font-size="14" fill="#888">no data</text>"##,
            HEIGHT / 2.0
        );
        svg.push_str("</svg>\n");
        return svg;
    }

    let (lo, hi) = equity
        .iter()
        .map(|p| p.equity)
        .chain(std::iter::once(initial_capital))
        .fold((f64::MAX, f64::MIN), |(lo, hi), v| (lo.min(v), hi.max(v)));
    let span = if hi > lo { hi - lo } else { 1.0 };
    let last = (equity.len().saturating_sub(1)).max(1) as f64;

    let x = |i: usize| MARGIN + i as f64 / last * (WIDTH - 2.0 * MARGIN);
    let y = |v: f64| HEIGHT - MARGIN - (v - lo) / span * (HEIGHT - 2.0 * MARGIN);

    // Axes and the starting-capital baseline
    let _ = writeln!(
        svg,
        r##"<line x1="{MARGIN}" y1="{b}" x2="{r}" y2="{b}" stroke="#999"/>"##,
        b = HEIGHT - MARGIN,
        r = WIDTH - MARGIN
    );
    let _ = writeln!(
        svg,
        r##"<line x1="{MARGIN}" y1="{MARGIN}" x2="{MARGIN}" y2="{b}" stroke="#999"/>"##,
        b = HEIGHT - MARGIN
    );
    let _ = writeln!(
        svg,
        r##"<line x1="{MARGIN}" y1="{y0:.1}" x2="{r}" y2="{y0:.1}" stroke="#bbb" stroke-dasharray="4 4"/>"##,
        y0 = y(initial_capital),
        r = WIDTH - MARGIN
    );
    for (value, anchor_y) in [(hi, y(hi)), (lo, y(lo))] {
        let _ = writeln!(
            svg,
            r##"<text x="4" y="{:.1}" font-family="sans-serif" font-size="10" fill="#555">{value:.0}</text>"##,
            anchor_y + 4.0
        );
    }

    let mut path = String::new();
    for (i, point) in equity.iter().enumerate() {
        let cmd = if i == 0 { 'M' } else { 'L' };
        let _ = write!(path, "{cmd}{:.1},{:.1} ", x(i), y(point.equity));
    }
    let _ = writeln!(
        svg,
        r##"<path d="{}" fill="none" stroke="#1f77b4" stroke-width="1.5"/>"##,
        path.trim_end()
    );

    let index_of = |ts| equity.iter().position(|p| p.timestamp == ts);
    for trade in trades {
        for (ts, color) in [(trade.entry_time, "#2ca02c"), (trade.exit_time, "#d62728")] {
            if let Some(i) = index_of(ts) {
                let _ = writeln!(
                    svg,
                    r#"<circle cx="{:.1}" cy="{:.1}" r="3" fill="{color}"/>"#,
                    x(i),
                    y(equity[i].equity)
                );
            }
        }
    }

    svg.push_str("</svg>\n");
    svg
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use common::OrderSide;

    #[test]
    fn draws_curve_and_trade_markers() {
        let start = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let equity: Vec<EquityPoint> = [100.0, 110.0, 105.0, 120.0]
            .iter()
            .enumerate()
            .map(|(i, &e)| EquityPoint {
                timestamp: start + Duration::minutes(i as i64),
                equity: e,
            })
            .collect();
        let trade = Trade {
            side: OrderSide::Buy,
            quantity: 1,
            entry_time: equity[0].timestamp,
            exit_time: equity[3].timestamp,
            entry_price: 1.0,
            exit_price: 1.2,
            pnl: 20.0,
            return_pct: 20.0,
            forced_exit: false,
        };
        let svg = equity_svg("RSI <TXF>", &equity, &[trade], 100.0);
        assert!(svg.starts_with("<svg"));
        assert!(svg.trim_end().ends_with("</svg>"));
        assert!(svg.contains("RSI &lt;TXF&gt;"));
        assert_eq!(svg.matches("<circle").count(), 2);
        assert!(svg.contains("<path d=\"M48.0,"));
    }

    #[test]
    fn empty_curve_still_renders() {
        let svg = equity_svg("x", &[], &[], 1.0);
        assert!(svg.contains("no data"));
    }
}

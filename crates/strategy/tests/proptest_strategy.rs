use chrono::{Duration, TimeZone, Utc};
use common::{Bar, Signal};
use proptest::prelude::*;
use strategy::indicators::{self, Params};
use strategy::{load, StrategyExecutor};

const PROGRAMS: &[&str] = &[
    "\
strategy RsiReversal:
    on_bar(bar):
        let r = ta(\"RSI\", period=14)
        if r == none:
            return hold
        if position == 0 and r[-1] < 30:
            return buy
        if position > 0 and r[-1] > 70:
            return close
        return hold
",
    "\
strategy MacdCross:
    on_bar(bar):
        let m = ta(\"MACD\")
        if m == none:
            return hold
        if cross_above(m.macd, m.signal):
            return buy
        elif cross_below(m.macd, m.signal):
            return sell
        return hold
",
    "\
strategy Ratio:
    state prev = 0
    on_bar(bar):
        let r = bar.close / (bar.close - bar.open)
        state.prev = r
        if r > 2:
            return \"buy\"
        return 7
",
    "\
strategy Bands:
    on_bar(bar):
        let b = ta(\"BB\", period=10, std=1.5)
        let k = ta(\"KD\")
        if b == none or k == none:
            pass
        elif bar.close < b.lower[-1] and k.k[-1] < 20:
            return buy
        elif bar.close > b.upper[-1]:
            return close
",
];

fn bars_from(closes: &[f64]) -> Vec<Bar> {
    let start = Utc.with_ymd_and_hms(2024, 1, 2, 0, 45, 0).unwrap();
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = if i == 0 { close } else { closes[i - 1] };
            Bar {
                timestamp: start + Duration::minutes(15 * i as i64),
                open,
                high: open.max(close) * 1.001,
                low: open.min(close) * 0.999,
                close,
                volume: 10.0 + i as f64,
            }
        })
        .collect()
}

proptest! {
    /// Arbitrary text never panics the loader.
    #[test]
    fn loader_never_panics(text in "\\PC{0,400}") {
        let _ = load(&text);
    }

    /// Near-miss programs: valid skeleton with arbitrary body text.
    #[test]
    fn loader_never_panics_on_program_like_text(body in "[a-z_()\\[\\]=<>.:,0-9 \"+-]{0,80}") {
        let text = format!("strategy Fuzz:\n    on_bar(bar):\n        {body}\n        return hold\n");
        let _ = load(&text);
    }

    /// Every bar yields one of the four signals, whatever the program does.
    #[test]
    fn execute_bar_stays_in_signal_domain(
        closes in prop::collection::vec(1.0f64..10_000.0, 1..120),
        which in 0..PROGRAMS.len(),
    ) {
        let (_, unit) = load(PROGRAMS[which]).unwrap();
        let mut ex = StrategyExecutor::new("prop", "TXF", &unit);
        for bar in bars_from(&closes) {
            let signal = ex.execute_bar(bar);
            prop_assert!(Signal::ALL.contains(&signal));
        }
        prop_assert_eq!(ex.position(), 0);
    }

    /// Indicator outputs never exceed the input length and never panic.
    #[test]
    fn indicators_are_total(
        closes in prop::collection::vec(0.5f64..1_000.0, 0..80),
        period in 1.0f64..40.0,
    ) {
        let bars = bars_from(&closes);
        let mut params = Params::new();
        params.insert("period".to_string(), period.floor());
        for spec in indicators::INDICATORS {
            if let Some(out) = indicators::compute(spec.name, &bars, &params) {
                let len = match out {
                    indicators::IndicatorOutput::Series(s) => s.len(),
                    indicators::IndicatorOutput::Frame(f) => f.len(),
                };
                prop_assert!(len <= bars.len());
            }
        }
    }
}

use std::sync::Arc;

use common::{Bar, Signal, TradeDirection};
use engine::{BacktestEngine, BacktestRequest};
use paper::{synthetic, PaperBroker, PaperMarket};
use proptest::prelude::*;
use strategy::{load, StrategyExecutor};

const MACD: &str = "\
strategy MacdCross:
    on_bar(bar):
        let m = ta(\"MACD\")
        if m == none:
            return hold
        if position == 0 and cross_above(m.macd, m.signal):
            return buy
        if position > 0 and cross_below(m.macd, m.signal):
            return close
        return hold
";

const RSI: &str = "\
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
";

const BELOW_ENTRY: &str = "\
strategy BelowEntry:
    on_bar(bar):
        if position == 0:
            return buy
        if bar.close < entry_price:
            return close
        return hold
";

fn request(program: &str) -> BacktestRequest {
    BacktestRequest {
        program: program.to_string(),
        unit_name: None,
        symbol: "TXF".into(),
        timeframe: "15m".into(),
        direction: TradeDirection::Both,
        quantity: 1,
        initial_capital: 1_000_000.0,
        tag: None,
    }
}

fn backtest(program: &str, bars: Vec<Bar>) -> engine::BacktestReport {
    backtest_with_slippage(program, bars, 0.0)
}

fn backtest_with_slippage(program: &str, bars: Vec<Bar>, slippage_bps: f64) -> engine::BacktestReport {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    rt.block_on(async {
        let market = PaperMarket::new();
        market.insert("TXF", bars).await;
        BacktestEngine::new(Arc::new(market))
            .with_slippage(slippage_bps)
            .run_backtest(&request(program))
            .await
            .unwrap()
    })
}

/// The runner's paper-mode path: evaluate, then fill through the broker.
fn live_signals(program: &str, bars: &[Bar]) -> Vec<Signal> {
    live_signals_with_slippage(program, bars, 0.0)
}

fn live_signals_with_slippage(program: &str, bars: &[Bar], slippage_bps: f64) -> Vec<Signal> {
    let (_, unit) = load(program).unwrap();
    let mut executor = StrategyExecutor::new("live", "TXF", &unit);
    let broker = PaperBroker::new("TXF", TradeDirection::Both, 1).with_slippage(slippage_bps);
    bars.iter()
        .map(|bar| {
            let signal = executor.execute_bar(*bar);
            if let Some(fill) = broker.fill_for(signal, bar, executor.position()) {
                executor.on_fill(&fill);
            }
            signal
        })
        .collect()
}

#[test]
fn quiet_market_holds_every_bar() {
    let bars = synthetic::quiet(500, 100.0, 0.2);
    let report = backtest(RSI, bars);
    assert_eq!(report.signals.len(), 500);
    assert!(report.signals.iter().all(|s| *s == Signal::Hold));
    assert_eq!(report.metrics.trade_count, 0);
    assert_eq!(report.metrics.total_pnl, 0.0);
    assert_eq!(report.equity.last().map(|p| p.equity), Some(1_000_000.0));
}

#[test]
fn dip_rally_matches_live_path() {
    let bars = synthetic::rsi_dip_rally();
    let report = backtest(RSI, bars.clone());
    assert_eq!(report.signals, live_signals(RSI, &bars));
}

#[test]
fn slippage_moves_entry_price_the_same_way_in_both_paths() {
    let bars = synthetic::flat(6, 100.0);

    let frictionless = backtest(BELOW_ENTRY, bars.clone());
    assert_eq!(
        frictionless.signals,
        vec![Signal::Buy, Signal::Hold, Signal::Hold, Signal::Hold, Signal::Hold, Signal::Hold]
    );

    // A buy filled 10 bps above the close sits above every later close.
    let slipped = backtest_with_slippage(BELOW_ENTRY, bars.clone(), 10.0);
    assert_eq!(
        slipped.signals,
        vec![Signal::Buy, Signal::Close, Signal::Buy, Signal::Close, Signal::Buy, Signal::Close]
    );
    assert_eq!(slipped.signals, live_signals_with_slippage(BELOW_ENTRY, &bars, 10.0));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// The same bars through the backtest and through the executor produce
    /// the same signal sequence.
    #[test]
    fn backtest_signals_equal_live_signals(
        closes in prop::collection::vec(50.0f64..150.0, 30..160),
        which in 0..3usize,
        slippage_bps in prop_oneof![Just(0.0f64), 0.5f64..25.0],
    ) {
        let program = [RSI, MACD, BELOW_ENTRY][which];
        let bars = synthetic::from_closes(&closes, synthetic::default_start(), 900);
        let report = backtest_with_slippage(program, bars.clone(), slippage_bps);
        prop_assert_eq!(report.signals, live_signals_with_slippage(program, &bars, slippage_bps));
    }
}

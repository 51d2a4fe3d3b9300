use common::{Bar, Fill, OrderSide, Signal};
use serde::Serialize;
use tracing::{debug, warn};

use crate::loader::{BarContext, CompiledUnit, StrategyInstance};
use crate::script::{ExecutionError, StateValue};
use crate::window::MarketWindow;

/// Point-in-time view of an executor.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutorStatus {
    pub strategy_id: String,
    pub unit_name: String,
    pub symbol: String,
    pub position: i64,
    pub entry_price: f64,
    pub bars: usize,
    pub state: Vec<(String, StateValue)>,
}

/// Runs one compiled unit against a stream of bars.
///
/// Position only changes through [`StrategyExecutor::on_fill`]; signals are
/// requests, the caller decides whether they are filled.
pub struct StrategyExecutor {
    strategy_id: String,
    symbol: String,
    instance: StrategyInstance,
    window: MarketWindow,
    position: i64,
    entry_price: f64,
}

impl StrategyExecutor {
    pub fn new(strategy_id: impl Into<String>, symbol: impl Into<String>, unit: &CompiledUnit) -> Self {
        Self::with_capacity(strategy_id, symbol, unit, MarketWindow::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(
        strategy_id: impl Into<String>,
        symbol: impl Into<String>,
        unit: &CompiledUnit,
        capacity: usize,
    ) -> Self {
        Self {
            strategy_id: strategy_id.into(),
            symbol: symbol.into(),
            instance: unit.instantiate(),
            window: MarketWindow::new(capacity),
            position: 0,
            entry_price: 0.0,
        }
    }

    /// Append `bar` and evaluate the program once.
    ///
    /// Values that do not name a signal are coerced to `hold`.
    pub fn step(&mut self, bar: Bar) -> Result<Signal, ExecutionError> {
        self.window.push(bar);
        let ctx = BarContext {
            window: self.window.as_slice(),
            position: self.position,
            entry_price: self.entry_price,
            symbol: &self.symbol,
        };
        let value = self.instance.on_bar(&ctx)?;
        match value.as_signal() {
            Some(signal) => {
                debug!(strategy = %self.strategy_id, %signal, close = bar.close, "bar evaluated");
                Ok(signal)
            }
            None => {
                warn!(
                    strategy = %self.strategy_id,
                    returned = %value.describe(),
                    "on_bar returned a non-signal value, treating as hold"
                );
                Ok(Signal::Hold)
            }
        }
    }

    /// Live policy: runtime errors are logged and become `hold`.
    pub fn execute_bar(&mut self, bar: Bar) -> Signal {
        match self.step(bar) {
            Ok(signal) => signal,
            Err(e) => {
                warn!(strategy = %self.strategy_id, error = %e, "on_bar failed, holding");
                Signal::Hold
            }
        }
    }

    pub fn on_fill(&mut self, fill: &Fill) {
        let delta = fill.side.sign() * fill.quantity;
        let before = self.position;
        let after = before + delta;

        let extends = before != 0 && before.signum() == delta.signum();
        let opens = before == 0 || (after != 0 && after.signum() != before.signum());

        if after == 0 {
            self.entry_price = 0.0;
        } else if opens || extends {
            self.entry_price = fill.price;
        }
        self.position = after;

        debug!(
            strategy = %self.strategy_id,
            side = ?fill.side,
            price = fill.price,
            position = self.position,
            "fill applied"
        );
    }

    /// Fill the window with history without running the program.
    pub fn warm_up(&mut self, bars: &[Bar]) {
        self.window.extend(bars.iter().copied());
    }

    pub fn reset(&mut self) {
        self.position = 0;
        self.entry_price = 0.0;
        self.window.clear();
        self.instance.reset();
    }

    pub fn position(&self) -> i64 {
        self.position
    }

    pub fn entry_price(&self) -> f64 {
        self.entry_price
    }

    pub fn strategy_id(&self) -> &str {
        &self.strategy_id
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn status(&self) -> ExecutorStatus {
        ExecutorStatus {
            strategy_id: self.strategy_id.clone(),
            unit_name: self.instance.unit().name().to_string(),
            symbol: self.symbol.clone(),
            position: self.position,
            entry_price: self.entry_price,
            bars: self.window.len(),
            state: self.instance.state(),
        }
    }
}

/// Side a buy/sell signal would trade, if any.
pub fn order_side(signal: Signal) -> Option<OrderSide> {
    match signal {
        Signal::Buy => Some(OrderSide::Buy),
        Signal::Sell => Some(OrderSide::Sell),
        Signal::Close | Signal::Hold => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::load;
    use chrono::{Duration, TimeZone, Utc};

    fn bar(i: i64, close: f64) -> Bar {
        Bar {
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(15 * i),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 100.0,
        }
    }

    fn executor(src: &str) -> StrategyExecutor {
        let (_, unit) = load(src).unwrap();
        StrategyExecutor::new("s1", "TXF", &unit)
    }

    fn fill(side: OrderSide, price: f64, quantity: i64) -> Fill {
        Fill {
            symbol: "TXF".into(),
            side,
            price,
            quantity,
            timestamp: Utc::now(),
        }
    }

    const ALWAYS_BUY: &str = "strategy AlwaysBuy:\n    on_bar(bar):\n        return buy\n";

    #[test]
    fn string_signals_are_accepted() {
        let mut ex = executor("strategy S:\n    on_bar(bar):\n        return \"sell\"\n");
        assert_eq!(ex.step(bar(0, 10.0)).unwrap(), Signal::Sell);
    }

    #[test]
    fn non_signal_values_become_hold() {
        let mut ex = executor("strategy S:\n    on_bar(bar):\n        return 42\n");
        assert_eq!(ex.step(bar(0, 10.0)).unwrap(), Signal::Hold);

        let mut ex = executor("strategy S:\n    on_bar(bar):\n        pass\n");
        assert_eq!(ex.step(bar(0, 10.0)).unwrap(), Signal::Hold);
    }

    #[test]
    fn runtime_errors_hold_in_live_policy() {
        let src = "strategy S:\n    on_bar(bar):\n        let x = bar.close / 0\n        return buy\n";
        let mut ex = executor(src);
        let err = ex.step(bar(0, 10.0)).unwrap_err();
        assert_eq!(err.line, 3);
        assert_eq!(ex.execute_bar(bar(1, 10.0)), Signal::Hold);
    }

    #[test]
    fn signals_do_not_move_position() {
        let mut ex = executor(ALWAYS_BUY);
        for i in 0..5 {
            assert_eq!(ex.execute_bar(bar(i, 10.0)), Signal::Buy);
        }
        assert_eq!(ex.position(), 0);
    }

    #[test]
    fn fills_track_position_and_entry() {
        let mut ex = executor(ALWAYS_BUY);
        ex.on_fill(&fill(OrderSide::Buy, 100.0, 1));
        assert_eq!((ex.position(), ex.entry_price()), (1, 100.0));

        ex.on_fill(&fill(OrderSide::Buy, 110.0, 1));
        assert_eq!((ex.position(), ex.entry_price()), (2, 110.0));

        // Partial reduce keeps entry.
        ex.on_fill(&fill(OrderSide::Sell, 120.0, 1));
        assert_eq!((ex.position(), ex.entry_price()), (1, 110.0));

        // Crossing through zero opens at the fill price.
        ex.on_fill(&fill(OrderSide::Sell, 90.0, 3));
        assert_eq!((ex.position(), ex.entry_price()), (-2, 90.0));

        ex.on_fill(&fill(OrderSide::Buy, 95.0, 2));
        assert_eq!((ex.position(), ex.entry_price()), (0, 0.0));
    }

    #[test]
    fn position_is_visible_to_program() {
        let src = "\
strategy Flip:
    on_bar(bar):
        if position == 0:
            return buy
        return close
";
        let mut ex = executor(src);
        assert_eq!(ex.execute_bar(bar(0, 10.0)), Signal::Buy);
        ex.on_fill(&fill(OrderSide::Buy, 10.0, 1));
        assert_eq!(ex.execute_bar(bar(1, 11.0)), Signal::Close);
    }

    #[test]
    fn warm_up_does_not_run_program_and_reset_clears() {
        let src = "\
strategy Count:
    state n = 0
    on_bar(bar):
        state.n = state.n + 1
        return hold
";
        let mut ex = executor(src);
        let history: Vec<Bar> = (0..10).map(|i| bar(i, 10.0)).collect();
        ex.warm_up(&history);
        let status = ex.status();
        assert_eq!(status.bars, 10);
        assert_eq!(status.state, vec![("user.n".to_string(), StateValue::Number(0.0))]);

        ex.execute_bar(bar(10, 10.0));
        ex.on_fill(&fill(OrderSide::Buy, 10.0, 1));
        ex.reset();
        let status = ex.status();
        assert_eq!((status.bars, status.position, status.entry_price), (0, 0, 0.0));
        assert_eq!(status.state, vec![("user.n".to_string(), StateValue::Number(0.0))]);
    }

    #[test]
    fn quiet_market_holds_for_five_hundred_bars() {
        let src = "\
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
        let mut ex = executor(src);
        let mut holds = 0;
        for i in 0..500 {
            let close = if i % 2 == 0 { 100.0 } else { 100.2 };
            if ex.execute_bar(bar(i, close)) == Signal::Hold {
                holds += 1;
            }
        }
        assert_eq!(holds, 500);
        let status = ex.status();
        assert_eq!((status.position, status.entry_price), (0, 0.0));
        assert_eq!(status.bars, MarketWindow::DEFAULT_CAPACITY);
    }

    #[test]
    fn order_side_maps_entries_only() {
        assert_eq!(order_side(Signal::Buy), Some(OrderSide::Buy));
        assert_eq!(order_side(Signal::Sell), Some(OrderSide::Sell));
        assert_eq!(order_side(Signal::Close), None);
    }
}

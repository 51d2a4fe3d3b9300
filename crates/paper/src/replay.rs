use common::{Bar, Fill, Signal, SignalHistogram};
use strategy::{ExecutionError, StrategyExecutor};

use crate::broker::PaperBroker;

/// How runtime errors inside `on_bar` are treated during a replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayMode {
    /// Abort on the first error.
    Strict,
    /// Same as the live loop: errors become `hold`.
    Lenient,
}

/// What happened on every bar of a replay.
#[derive(Debug, Clone, Default)]
pub struct ReplayTrace {
    pub signals: Vec<Signal>,
    pub fills: Vec<Fill>,
    /// Position after the bar's fill, one entry per bar.
    pub positions: Vec<i64>,
    pub histogram: SignalHistogram,
}

impl ReplayTrace {
    /// Bars that produced a non-hold signal.
    pub fn trade_bars(&self) -> Vec<(usize, Signal)> {
        self.signals
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_trade())
            .map(|(i, s)| (i, *s))
            .collect()
    }
}

/// Drives an executor through history, feeding simulated fills back in.
pub struct Replayer {
    broker: PaperBroker,
    mode: ReplayMode,
}

impl Replayer {
    pub fn new(broker: PaperBroker, mode: ReplayMode) -> Self {
        Self { broker, mode }
    }

    pub fn broker(&self) -> &PaperBroker {
        &self.broker
    }

    pub fn run(&self, executor: &mut StrategyExecutor, bars: &[Bar]) -> Result<ReplayTrace, ExecutionError> {
        let mut trace = ReplayTrace {
            signals: Vec::with_capacity(bars.len()),
            positions: Vec::with_capacity(bars.len()),
            ..Default::default()
        };
        for bar in bars {
            let signal = match self.mode {
                ReplayMode::Strict => executor.step(*bar)?,
                ReplayMode::Lenient => executor.execute_bar(*bar),
            };
            if let Some(fill) = self.broker.fill_for(signal, bar, executor.position()) {
                executor.on_fill(&fill);
                trace.fills.push(fill);
            }
            trace.signals.push(signal);
            trace.histogram.record(signal);
            trace.positions.push(executor.position());
        }
        Ok(trace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic;
    use common::TradeDirection;

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

    fn executor(src: &str) -> StrategyExecutor {
        let (_, unit) = strategy::load(src).unwrap();
        StrategyExecutor::new("t", "TXF", &unit)
    }

    #[test]
    fn fills_feed_back_into_position() {
        let replayer = Replayer::new(PaperBroker::new("TXF", TradeDirection::Long, 1), ReplayMode::Strict);
        let mut ex = executor(RSI);
        let trace = replayer.run(&mut ex, &synthetic::rsi_dip_rally()).unwrap();

        assert_eq!(trace.signals.len(), 100);
        assert_eq!(trace.positions.len(), 100);
        let trades = trace.trade_bars();
        assert_eq!(trades, vec![(46, Signal::Buy), (72, Signal::Close)]);
        assert_eq!(trace.fills.len(), 2);
        assert_eq!(*trace.positions.last().unwrap(), 0);
    }

    #[test]
    fn strict_mode_surfaces_runtime_errors() {
        let src = "strategy Bad:\n    on_bar(bar):\n        return bar.close / 0\n";
        let bars = synthetic::flat(5, 100.0);

        let strict = Replayer::new(PaperBroker::new("TXF", TradeDirection::Both, 1), ReplayMode::Strict);
        assert!(strict.run(&mut executor(src), &bars).is_err());

        let lenient = Replayer::new(PaperBroker::new("TXF", TradeDirection::Both, 1), ReplayMode::Lenient);
        let trace = lenient.run(&mut executor(src), &bars).unwrap();
        assert_eq!(trace.histogram.hold, 5);
    }

    #[test]
    fn forbidden_entries_leave_position_flat() {
        let src = "strategy Shorty:\n    on_bar(bar):\n        return sell\n";
        let replayer = Replayer::new(PaperBroker::new("TXF", TradeDirection::Long, 1), ReplayMode::Strict);
        let trace = replayer.run(&mut executor(src), &synthetic::flat(10, 50.0)).unwrap();
        assert!(trace.fills.is_empty());
        assert_eq!(trace.histogram.sell, 10);
        assert!(trace.positions.iter().all(|p| *p == 0));
    }
}

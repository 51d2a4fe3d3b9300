use tracing::debug;

use common::{Bar, Fill, OrderSide, Signal, TradeDirection};

/// Simulated order layer: one position at a time, filled at the bar close.
///
/// - `buy` when flat opens a long, `sell` when flat opens a short
/// - `close` when not flat flattens the position
/// - everything else, and entries the direction forbids, is ignored
#[derive(Debug, Clone)]
pub struct PaperBroker {
    symbol: String,
    direction: TradeDirection,
    quantity: i64,
    /// Slippage in basis points applied to all fills.
    slippage_bps: f64,
}

impl PaperBroker {
    pub fn new(symbol: impl Into<String>, direction: TradeDirection, quantity: i64) -> Self {
        Self {
            symbol: symbol.into(),
            direction,
            quantity: quantity.max(1),
            slippage_bps: 0.0,
        }
    }

    pub fn with_slippage(mut self, slippage_bps: f64) -> Self {
        self.slippage_bps = slippage_bps.max(0.0);
        self
    }

    pub fn direction(&self) -> TradeDirection {
        self.direction
    }

    /// The fill `signal` produces on `bar` given the current `position`.
    pub fn fill_for(&self, signal: Signal, bar: &Bar, position: i64) -> Option<Fill> {
        let (side, quantity) = match signal {
            Signal::Buy if position == 0 => (OrderSide::Buy, self.quantity),
            Signal::Sell if position == 0 => (OrderSide::Sell, self.quantity),
            Signal::Close if position > 0 => (OrderSide::Sell, position),
            Signal::Close if position < 0 => (OrderSide::Buy, -position),
            _ => return None,
        };
        let is_entry = position == 0;
        if is_entry && !self.direction.permits(side) {
            debug!(symbol = %self.symbol, %signal, direction = %self.direction, "entry not permitted");
            return None;
        }

        // Buys pay more, sells receive less
        let price = match side {
            OrderSide::Buy => bar.close * (1.0 + self.slippage_bps / 10_000.0),
            OrderSide::Sell => bar.close * (1.0 - self.slippage_bps / 10_000.0),
        };

        debug!(
            symbol = %self.symbol,
            side = ?side,
            close = bar.close,
            fill = price,
            qty = quantity,
            "Paper fill simulated"
        );

        Some(Fill {
            symbol: self.symbol.clone(),
            side,
            price,
            quantity,
            timestamp: bar.timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn bar(close: f64) -> Bar {
        Bar {
            timestamp: Utc::now(),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
        }
    }

    #[test]
    fn buy_fill_applies_positive_slippage() {
        let broker = PaperBroker::new("TXF", TradeDirection::Both, 1).with_slippage(10.0);
        let fill = broker.fill_for(Signal::Buy, &bar(1000.0), 0).unwrap();
        let expected = 1000.0 * (1.0 + 10.0 / 10_000.0);
        assert!((fill.price - expected).abs() < 1e-6, "{} vs {expected}", fill.price);
        assert_eq!(fill.side, OrderSide::Buy);
    }

    #[test]
    fn close_of_long_sells_whole_position_with_negative_slippage() {
        let broker = PaperBroker::new("TXF", TradeDirection::Both, 1).with_slippage(10.0);
        let fill = broker.fill_for(Signal::Close, &bar(1000.0), 3).unwrap();
        let expected = 1000.0 * (1.0 - 10.0 / 10_000.0);
        assert!((fill.price - expected).abs() < 1e-6);
        assert_eq!((fill.side, fill.quantity), (OrderSide::Sell, 3));
    }

    #[test]
    fn orders_are_exclusive() {
        let broker = PaperBroker::new("TXF", TradeDirection::Both, 1);
        assert!(broker.fill_for(Signal::Buy, &bar(10.0), 1).is_none());
        assert!(broker.fill_for(Signal::Sell, &bar(10.0), 1).is_none());
        assert!(broker.fill_for(Signal::Close, &bar(10.0), 0).is_none());
        assert!(broker.fill_for(Signal::Hold, &bar(10.0), 0).is_none());
        let cover = broker.fill_for(Signal::Close, &bar(10.0), -2).unwrap();
        assert_eq!((cover.side, cover.quantity), (OrderSide::Buy, 2));
    }

    #[test]
    fn direction_blocks_entries_but_not_exits() {
        let long_only = PaperBroker::new("TXF", TradeDirection::Long, 1);
        assert!(long_only.fill_for(Signal::Sell, &bar(10.0), 0).is_none());
        assert!(long_only.fill_for(Signal::Buy, &bar(10.0), 0).is_some());

        let short_only = PaperBroker::new("TXF", TradeDirection::Short, 1);
        assert!(short_only.fill_for(Signal::Buy, &bar(10.0), 0).is_none());
        assert!(short_only.fill_for(Signal::Close, &bar(10.0), 1).is_some());
    }
}

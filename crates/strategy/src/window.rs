use std::collections::VecDeque;

use common::Bar;

/// Append-only bar history capped at `capacity`; the oldest bar is evicted first.
#[derive(Debug, Clone)]
pub struct MarketWindow {
    bars: VecDeque<Bar>,
    capacity: usize,
}

impl MarketWindow {
    pub const DEFAULT_CAPACITY: usize = 500;

    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            bars: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, bar: Bar) {
        if self.bars.len() == self.capacity {
            self.bars.pop_front();
        }
        self.bars.push_back(bar);
    }

    pub fn extend<I: IntoIterator<Item = Bar>>(&mut self, bars: I) {
        for bar in bars {
            self.push(bar);
        }
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn latest(&self) -> Option<&Bar> {
        self.bars.back()
    }

    /// Contiguous view of the window, oldest first.
    pub fn as_slice(&mut self) -> &[Bar] {
        self.bars.make_contiguous()
    }

    /// Copy of the last `n` bars, oldest first.
    pub fn tail(&self, n: usize) -> Vec<Bar> {
        let skip = self.bars.len().saturating_sub(n);
        self.bars.iter().skip(skip).copied().collect()
    }

    pub fn clear(&mut self) {
        self.bars.clear();
    }
}

impl Default for MarketWindow {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
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
            volume: 0.0,
        }
    }

    #[test]
    fn evicts_oldest_at_capacity() {
        let mut w = MarketWindow::new(3);
        w.extend((1..=5).map(|i| bar(i as f64)));
        assert_eq!(w.len(), 3);
        let closes: Vec<f64> = w.as_slice().iter().map(|b| b.close).collect();
        assert_eq!(closes, vec![3.0, 4.0, 5.0]);
        assert_eq!(w.latest().map(|b| b.close), Some(5.0));
    }

    #[test]
    fn tail_clamps_to_len() {
        let mut w = MarketWindow::default();
        w.extend((1..=4).map(|i| bar(i as f64)));
        assert_eq!(w.tail(2).len(), 2);
        assert_eq!(w.tail(10).len(), 4);
    }
}

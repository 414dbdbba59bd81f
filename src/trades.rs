use std::collections::{HashSet, VecDeque};

use rust_decimal::Decimal;

/// One executed trade from the trade channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TradeEvent {
    pub id: u64,
    pub price: Decimal,
    pub quantity: Decimal,
    pub timestamp: u64,
    pub aggressive_buy: bool,
}

/// A trade as consumers read it; `is_new` is resolved lazily against the
/// stored expiry instead of a scheduled callback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TradeView {
    pub trade: TradeEvent,
    pub is_new: bool,
}

#[derive(Debug, Clone, Copy)]
struct TradeEntry {
    trade: TradeEvent,
    fresh_until_ms: u64,
}

/// Bounded ring of recent trades, newest first. Duplicate deliveries across
/// reconnects are suppressed by id.
#[derive(Debug)]
pub struct TradeFeed {
    entries: VecDeque<TradeEntry>,
    seen: IdDeduper,
    capacity: usize,
    flash_ms: u64,
}

impl TradeFeed {
    pub fn new(capacity: usize, flash_ms: u64) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            seen: IdDeduper::new(capacity * 10),
            capacity,
            flash_ms,
        }
    }

    /// Prepends a trade, dropping the oldest entry beyond capacity. Returns
    /// false for a duplicate delivery.
    pub fn push(&mut self, trade: TradeEvent, now_ms: u64) -> bool {
        if !self.seen.insert(trade.id) {
            return false;
        }

        self.entries.push_front(TradeEntry {
            trade,
            fresh_until_ms: now_ms.saturating_add(self.flash_ms),
        });
        while self.entries.len() > self.capacity {
            self.entries.pop_back();
        }

        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.seen.clear();
    }

    /// Newest-first view with the flash flag resolved at `now_ms`.
    pub fn entries(&self, now_ms: u64) -> Vec<TradeView> {
        self.entries
            .iter()
            .map(|entry| TradeView {
                trade: entry.trade,
                is_new: now_ms < entry.fresh_until_ms,
            })
            .collect()
    }
}

/// Insertion-ordered dedup window; the oldest key is evicted once capacity
/// is hit.
#[derive(Debug)]
struct IdDeduper {
    set: HashSet<u64>,
    order: VecDeque<u64>,
    capacity: usize,
}

impl IdDeduper {
    fn new(capacity: usize) -> Self {
        Self {
            set: HashSet::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    fn insert(&mut self, key: u64) -> bool {
        if self.set.contains(&key) {
            return false;
        }

        self.set.insert(key);
        self.order.push_back(key);

        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.set.remove(&evicted);
            }
        }

        true
    }

    fn clear(&mut self) {
        self.set.clear();
        self.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn trade(id: u64, timestamp: u64) -> TradeEvent {
        TradeEvent {
            id,
            price: dec!(100.5),
            quantity: dec!(0.25),
            timestamp,
            aggressive_buy: id % 2 == 0,
        }
    }

    #[test]
    fn push_prepends_and_caps_at_capacity() {
        let mut feed = TradeFeed::new(3, 300);
        for id in 0..5 {
            assert!(feed.push(trade(id, id), 1_000));
        }

        assert_eq!(feed.len(), 3);
        let ids: Vec<u64> = feed.entries(1_000).iter().map(|view| view.trade.id).collect();
        assert_eq!(ids, vec![4, 3, 2]);
    }

    #[test]
    fn duplicate_ids_are_dropped() {
        let mut feed = TradeFeed::new(10, 300);
        assert!(feed.push(trade(7, 1), 1_000));
        assert!(!feed.push(trade(7, 2), 1_001));
        assert_eq!(feed.len(), 1);
    }

    #[test]
    fn flash_clears_after_the_window_independent_of_later_pushes() {
        let mut feed = TradeFeed::new(10, 300);
        feed.push(trade(1, 1), 1_000);
        feed.push(trade(2, 2), 1_200);

        let at_1250 = feed.entries(1_250);
        assert!(at_1250.iter().all(|view| view.is_new));

        let at_1350 = feed.entries(1_350);
        assert!(at_1350[0].is_new); // id 2, fresh until 1500
        assert!(!at_1350[1].is_new); // id 1, expired at 1300

        let at_2000 = feed.entries(2_000);
        assert!(at_2000.iter().all(|view| !view.is_new));
    }

    #[test]
    fn clear_forgets_seen_ids() {
        let mut feed = TradeFeed::new(10, 300);
        feed.push(trade(1, 1), 1_000);
        feed.clear();

        assert!(feed.is_empty());
        assert!(feed.push(trade(1, 1), 2_000));
    }
}

use std::collections::HashMap;

use rust_decimal::Decimal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Bid,
    Ask,
}

impl Side {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bid => "bid",
            Self::Ask => "ask",
        }
    }
}

/// Canonical per-price-level ledger for both sides of the book.
///
/// Storage order is irrelevant: levels live in hash maps keyed by price so
/// diff application stays O(1) amortized, and consumers sort at projection
/// cadence. A level with quantity zero does not exist.
#[derive(Debug, Default)]
pub struct OrderBookStore {
    bids: HashMap<Decimal, Decimal>,
    asks: HashMap<Decimal, Decimal>,
}

impl OrderBookStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn side(&self, side: Side) -> &HashMap<Decimal, Decimal> {
        match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        }
    }

    fn side_mut(&mut self, side: Side) -> &mut HashMap<Decimal, Decimal> {
        match side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        }
    }

    /// Sets the level at `price` to `qty`, removing it when `qty` is zero.
    pub fn upsert_or_delete(&mut self, side: Side, price: Decimal, qty: Decimal) {
        let levels = self.side_mut(side);
        if qty.is_zero() || qty.is_sign_negative() {
            levels.remove(&price);
        } else {
            levels.insert(price, qty);
        }
    }

    /// Bulk-replaces one side. Used only by snapshot load; zero-quantity
    /// entries are dropped rather than stored.
    pub fn replace_all(&mut self, side: Side, entries: Vec<(Decimal, Decimal)>) {
        let levels = self.side_mut(side);
        levels.clear();
        for (price, qty) in entries {
            if !qty.is_zero() && !qty.is_sign_negative() {
                levels.insert(price, qty);
            }
        }
    }

    /// Best price on a side: max bid, min ask. Linear scan; only called at
    /// projection cadence, never per message.
    pub fn best_price(&self, side: Side) -> Option<Decimal> {
        let levels = self.side(side);
        match side {
            Side::Bid => levels.keys().max().copied(),
            Side::Ask => levels.keys().min().copied(),
        }
    }

    pub fn quantity_at(&self, side: Side, price: Decimal) -> Option<Decimal> {
        self.side(side).get(&price).copied()
    }

    pub fn levels(&self, side: Side) -> impl Iterator<Item = (Decimal, Decimal)> + '_ {
        self.side(side).iter().map(|(price, qty)| (*price, *qty))
    }

    pub fn depth(&self, side: Side) -> usize {
        self.side(side).len()
    }

    pub fn is_side_empty(&self, side: Side) -> bool {
        self.side(side).is_empty()
    }

    pub fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
    }
}

use std::collections::HashMap;

use rust_decimal::Decimal;

use crate::{
    book::{OrderBookStore, Side},
    wire::BestQuote,
};

pub const MIN_DISPLAY_ROWS: usize = 5;
pub const MAX_DISPLAY_ROWS: usize = 100;
pub const GROUPING_MULTIPLIERS: &[u32] = &[1, 5, 10, 50];

/// Spreads wider than this fraction of mid mean the book is transiently
/// inconsistent; an empty projection beats a misleading one.
const SPREAD_SANITY_CEILING_PERCENT: Decimal = Decimal::TEN;

#[derive(Debug, Clone)]
pub struct ProjectionSettings {
    pub rows: usize,
    pub grouping_multiplier: u32,
    pub tick_size: Decimal,
}

impl ProjectionSettings {
    pub fn new(rows: usize, grouping_multiplier: u32, tick_size: Decimal) -> Self {
        Self {
            rows: rows.clamp(MIN_DISPLAY_ROWS, MAX_DISPLAY_ROWS),
            grouping_multiplier: normalize_grouping(grouping_multiplier),
            tick_size,
        }
    }

    /// Grouping step: tick size times the multiplier, never below one tick.
    pub fn grouping_step(&self) -> Decimal {
        let step = self.tick_size * Decimal::from(self.grouping_multiplier);
        step.max(self.tick_size)
    }
}

pub fn normalize_grouping(multiplier: u32) -> u32 {
    if GROUPING_MULTIPLIERS.contains(&multiplier) {
        multiplier
    } else {
        1
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectionRow {
    pub price: Decimal,
    pub quantity: Decimal,
    /// Running cumulative quantity from the top of the side down to here.
    pub total: Decimal,
}

/// Immutable, display-ready view of the book at one instant.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Projection {
    pub bid_rows: Vec<ProjectionRow>,
    pub ask_rows: Vec<ProjectionRow>,
    pub max_bid_total: Decimal,
    pub max_ask_total: Decimal,
    pub spread: Decimal,
    pub spread_percent: Decimal,
    pub mid: Decimal,
    pub best_bid: Option<ProjectionRow>,
    pub best_ask: Option<ProjectionRow>,
}

impl Projection {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.bid_rows.is_empty() && self.ask_rows.is_empty() && self.best_bid.is_none()
    }
}

/// Builds the display projection from a point-in-time read of the store.
///
/// Follows the degradation ladder: empty side -> empty projection; crossed
/// or collapsed local spread -> quote-only projection when the independent
/// quote is sane; implausible spread -> empty projection.
pub fn project(
    store: &OrderBookStore,
    quote: Option<&BestQuote>,
    settings: &ProjectionSettings,
) -> Projection {
    let (Some(best_bid), Some(best_ask)) =
        (store.best_price(Side::Bid), store.best_price(Side::Ask))
    else {
        return Projection::empty();
    };

    let spread = best_ask - best_bid;
    if spread <= Decimal::ZERO {
        return quote_only(quote);
    }

    let mid = (best_ask + best_bid) / Decimal::TWO;
    if mid <= Decimal::ZERO {
        return Projection::empty();
    }
    let spread_percent = spread / mid * Decimal::ONE_HUNDRED;
    if spread_percent > SPREAD_SANITY_CEILING_PERCENT {
        return Projection::empty();
    }

    let step = settings.grouping_step();
    let bid_rows = bucket_side(store, Side::Bid, step, settings.rows);
    let ask_rows = bucket_side(store, Side::Ask, step, settings.rows);
    let max_bid_total = bid_rows.last().map(|row| row.total).unwrap_or_default();
    let max_ask_total = ask_rows.last().map(|row| row.total).unwrap_or_default();

    let best_bid = top_row(store, Side::Bid, best_bid);
    let best_ask = top_row(store, Side::Ask, best_ask);

    Projection {
        bid_rows,
        ask_rows,
        max_bid_total,
        max_ask_total,
        spread,
        spread_percent,
        mid,
        best_bid,
        best_ask,
    }
}

fn quote_only(quote: Option<&BestQuote>) -> Projection {
    let Some(quote) = quote.filter(|quote| quote.is_sane()) else {
        return Projection::empty();
    };

    let spread = quote.ask_price - quote.bid_price;
    let mid = (quote.ask_price + quote.bid_price) / Decimal::TWO;
    let spread_percent = if mid > Decimal::ZERO {
        spread / mid * Decimal::ONE_HUNDRED
    } else {
        Decimal::ZERO
    };

    Projection {
        bid_rows: Vec::new(),
        ask_rows: Vec::new(),
        max_bid_total: Decimal::ZERO,
        max_ask_total: Decimal::ZERO,
        spread,
        spread_percent,
        mid,
        best_bid: Some(ProjectionRow {
            price: quote.bid_price,
            quantity: quote.bid_qty,
            total: quote.bid_qty,
        }),
        best_ask: Some(ProjectionRow {
            price: quote.ask_price,
            quantity: quote.ask_qty,
            total: quote.ask_qty,
        }),
    }
}

/// Buckets every level on a side to the grouping step (bids floor, asks
/// ceil), aggregates quantities, orders best-first, truncates to the row
/// count, and accumulates running totals.
fn bucket_side(store: &OrderBookStore, side: Side, step: Decimal, rows: usize) -> Vec<ProjectionRow> {
    let mut buckets: HashMap<Decimal, Decimal> = HashMap::new();
    for (price, qty) in store.levels(side) {
        let bucket = match side {
            Side::Bid => bucket_floor(price, step),
            Side::Ask => bucket_ceil(price, step),
        };
        *buckets.entry(bucket).or_default() += qty;
    }

    let mut sorted: Vec<(Decimal, Decimal)> = buckets.into_iter().collect();
    match side {
        Side::Bid => sorted.sort_by(|left, right| right.0.cmp(&left.0)),
        Side::Ask => sorted.sort_by(|left, right| left.0.cmp(&right.0)),
    }
    sorted.truncate(rows);

    let mut output = Vec::with_capacity(sorted.len());
    let mut total = Decimal::ZERO;
    for (price, quantity) in sorted {
        total += quantity;
        output.push(ProjectionRow {
            price,
            quantity,
            total,
        });
    }

    output
}

fn top_row(store: &OrderBookStore, side: Side, price: Decimal) -> Option<ProjectionRow> {
    store.quantity_at(side, price).map(|quantity| ProjectionRow {
        price,
        quantity,
        total: quantity,
    })
}

pub fn bucket_floor(price: Decimal, step: Decimal) -> Decimal {
    (price / step).floor() * step
}

pub fn bucket_ceil(price: Decimal, step: Decimal) -> Decimal {
    (price / step).ceil() * step
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn settings(rows: usize, multiplier: u32) -> ProjectionSettings {
        ProjectionSettings::new(rows, multiplier, dec!(0.01))
    }

    fn store_with(bids: &[(Decimal, Decimal)], asks: &[(Decimal, Decimal)]) -> OrderBookStore {
        let mut store = OrderBookStore::new();
        for (price, qty) in bids {
            store.upsert_or_delete(Side::Bid, *price, *qty);
        }
        for (price, qty) in asks {
            store.upsert_or_delete(Side::Ask, *price, *qty);
        }
        store
    }

    #[test]
    fn bucketing_floors_bids_and_ceils_asks() {
        assert_eq!(bucket_floor(dec!(100.237), dec!(0.05)), dec!(100.20));
        assert_eq!(bucket_ceil(dec!(100.264), dec!(0.05)), dec!(100.30));
        assert_eq!(bucket_floor(dec!(100.20), dec!(0.05)), dec!(100.20));
    }

    #[test]
    fn grouping_step_never_drops_below_one_tick() {
        assert_eq!(settings(20, 5).grouping_step(), dec!(0.05));
        assert_eq!(settings(20, 1).grouping_step(), dec!(0.01));
        // Unknown multipliers normalize to x1.
        assert_eq!(settings(20, 7).grouping_step(), dec!(0.01));
    }

    #[test]
    fn empty_book_projects_empty() {
        let projection = project(&OrderBookStore::new(), None, &settings(20, 1));
        assert!(projection.is_empty());
        assert_eq!(projection.spread, Decimal::ZERO);
        assert_eq!(projection.spread_percent, Decimal::ZERO);
        assert_eq!(projection.mid, Decimal::ZERO);
    }

    #[test]
    fn one_empty_side_projects_empty() {
        let store = store_with(&[(dec!(100), dec!(1))], &[]);
        assert!(project(&store, None, &settings(20, 1)).is_empty());
    }

    #[test]
    fn projection_orders_rows_and_accumulates_totals() {
        let store = store_with(
            &[
                (dec!(100.00), dec!(1)),
                (dec!(99.50), dec!(2)),
                (dec!(99.00), dec!(4)),
            ],
            &[
                (dec!(100.10), dec!(3)),
                (dec!(100.50), dec!(1)),
                (dec!(101.00), dec!(5)),
            ],
        );

        let projection = project(&store, None, &settings(20, 1));

        let bid_prices: Vec<Decimal> = projection.bid_rows.iter().map(|row| row.price).collect();
        assert_eq!(bid_prices, vec![dec!(100.00), dec!(99.50), dec!(99.00)]);
        let ask_prices: Vec<Decimal> = projection.ask_rows.iter().map(|row| row.price).collect();
        assert_eq!(ask_prices, vec![dec!(100.10), dec!(100.50), dec!(101.00)]);

        let bid_totals: Vec<Decimal> = projection.bid_rows.iter().map(|row| row.total).collect();
        assert_eq!(bid_totals, vec![dec!(1), dec!(3), dec!(7)]);
        assert_eq!(projection.max_bid_total, dec!(7));
        assert_eq!(projection.max_ask_total, dec!(9));

        assert_eq!(projection.spread, dec!(0.10));
        assert_eq!(projection.mid, dec!(100.05));
        assert_eq!(
            projection.best_bid,
            Some(ProjectionRow {
                price: dec!(100.00),
                quantity: dec!(1),
                total: dec!(1),
            })
        );
    }

    #[test]
    fn grouping_aggregates_levels_into_buckets() {
        let store = store_with(
            &[(dec!(100.237), dec!(1)), (dec!(100.21), dec!(2))],
            &[(dec!(100.264), dec!(3)), (dec!(100.30), dec!(4))],
        );

        let projection = project(&store, None, &settings(20, 5));

        assert_eq!(projection.bid_rows.len(), 1);
        assert_eq!(projection.bid_rows[0].price, dec!(100.20));
        assert_eq!(projection.bid_rows[0].quantity, dec!(3));

        assert_eq!(projection.ask_rows.len(), 1);
        assert_eq!(projection.ask_rows[0].price, dec!(100.30));
        assert_eq!(projection.ask_rows[0].quantity, dec!(7));
    }

    #[test]
    fn row_count_truncates_each_side() {
        let mut store = OrderBookStore::new();
        for index in 0..30 {
            let offset = Decimal::from(index) * dec!(0.01);
            store.upsert_or_delete(Side::Bid, dec!(100.00) - offset, dec!(1));
            store.upsert_or_delete(Side::Ask, dec!(100.01) + offset, dec!(1));
        }

        let projection = project(&store, None, &settings(5, 1));
        assert_eq!(projection.bid_rows.len(), 5);
        assert_eq!(projection.ask_rows.len(), 5);
        assert_eq!(projection.max_bid_total, dec!(5));
    }

    #[test]
    fn crossed_book_falls_back_to_sane_quote() {
        let store = store_with(&[(dec!(100.01), dec!(1))], &[(dec!(100.00), dec!(1))]);
        let quote = BestQuote {
            bid_price: dec!(100.00),
            bid_qty: dec!(2),
            ask_price: dec!(100.05),
            ask_qty: dec!(3),
        };

        let projection = project(&store, Some(&quote), &settings(20, 1));

        assert!(projection.bid_rows.is_empty());
        assert!(projection.ask_rows.is_empty());
        assert_eq!(projection.spread, dec!(0.05));
        assert_eq!(projection.mid, dec!(100.025));
        assert_eq!(projection.best_bid.map(|row| row.price), Some(dec!(100.00)));
        assert_eq!(projection.best_ask.map(|row| row.quantity), Some(dec!(3)));
    }

    #[test]
    fn crossed_book_without_sane_quote_projects_empty() {
        let store = store_with(&[(dec!(100.01), dec!(1))], &[(dec!(100.00), dec!(1))]);
        let crossed_quote = BestQuote {
            bid_price: dec!(100.05),
            bid_qty: dec!(1),
            ask_price: dec!(100.00),
            ask_qty: dec!(1),
        };

        assert!(project(&store, None, &settings(20, 1)).is_empty());
        assert!(project(&store, Some(&crossed_quote), &settings(20, 1)).is_empty());
    }

    #[test]
    fn implausible_spread_projects_empty() {
        let store = store_with(&[(dec!(100), dec!(1))], &[(dec!(150), dec!(1))]);
        assert!(project(&store, None, &settings(20, 1)).is_empty());
    }
}

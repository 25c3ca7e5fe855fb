//! Price-bucket aggregation.
//!
//! Trades are binned by `round(price / bucket_size) * bucket_size` and their
//! quantities summed per side. `tick` hands the whole live bucket set to the
//! caller and starts a fresh one in the same `&mut self` call, so a classifier
//! never observes a half-reset window.

use crate::types::TradeEvent;
use rust_decimal::{Decimal, RoundingStrategy};
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::time::Duration;

// ============================================================================
// Buckets
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Bucket {
    pub buy_volume: Decimal,
    pub sell_volume: Decimal,
}

impl Bucket {
    pub fn total(&self) -> Decimal {
        self.buy_volume + self.sell_volume
    }
}

/// The bucket set of one finished aggregation window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BucketSnapshot {
    pub buckets: FxHashMap<Decimal, Bucket>,
    pub window_start_ms: i64,
    pub window_end_ms: i64,
}

impl BucketSnapshot {
    pub fn is_empty(&self) -> bool {
        self.buckets.values().all(|b| b.total().is_zero())
    }

    /// Bucket with the largest combined volume. Ties go to the lower price so
    /// the result does not depend on hash order.
    pub fn strongest(&self) -> Option<(Decimal, Bucket)> {
        self.buckets
            .iter()
            .filter(|(_, b)| !b.total().is_zero())
            .max_by(|(pa, a), (pb, b)| a.total().cmp(&b.total()).then_with(|| pb.cmp(pa)))
            .map(|(p, b)| (*p, *b))
    }

    pub fn total_buy(&self) -> Decimal {
        self.buckets.values().map(|b| b.buy_volume).sum()
    }

    pub fn total_sell(&self) -> Decimal {
        self.buckets.values().map(|b| b.sell_volume).sum()
    }
}

// ============================================================================
// Bucket Aggregator
// ============================================================================

#[derive(Debug)]
pub struct BucketAggregator {
    bucket_size: Decimal,
    interval_ms: i64,
    window_start_ms: i64,
    buckets: FxHashMap<Decimal, Bucket>,
}

impl BucketAggregator {
    pub fn new(bucket_size: Decimal, interval: Duration, now_ms: i64) -> Self {
        Self {
            bucket_size,
            interval_ms: interval.as_millis() as i64,
            window_start_ms: now_ms,
            buckets: FxHashMap::default(),
        }
    }

    pub fn bucket_key(&self, price: Decimal) -> Decimal {
        let steps = (price / self.bucket_size)
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
        (steps * self.bucket_size).normalize()
    }

    pub fn ingest(&mut self, trade: &TradeEvent) {
        let key = self.bucket_key(trade.price);
        let bucket = self.buckets.entry(key).or_default();
        if trade.is_sell {
            bucket.sell_volume += trade.quantity;
        } else {
            bucket.buy_volume += trade.quantity;
        }
    }

    /// Close the window if `interval` has elapsed since it opened.
    pub fn tick(&mut self, now_ms: i64) -> Option<BucketSnapshot> {
        if now_ms - self.window_start_ms < self.interval_ms {
            return None;
        }
        let snapshot = BucketSnapshot {
            buckets: std::mem::take(&mut self.buckets),
            window_start_ms: self.window_start_ms,
            window_end_ms: now_ms,
        };
        self.window_start_ms = now_ms;
        Some(snapshot)
    }

    pub fn window_start_ms(&self) -> i64 {
        self.window_start_ms
    }

    pub fn live_bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

// ============================================================================
// Trailing trade window
// ============================================================================

/// Rolling buffer of the most recent raw trades, used for the buy/sell ratio.
#[derive(Debug)]
pub struct TradeWindow {
    span_ms: i64,
    trades: VecDeque<TradeEvent>,
    buy_volume: Decimal,
    sell_volume: Decimal,
}

impl TradeWindow {
    pub fn new(span: Duration) -> Self {
        Self {
            span_ms: span.as_millis() as i64,
            trades: VecDeque::new(),
            buy_volume: Decimal::ZERO,
            sell_volume: Decimal::ZERO,
        }
    }

    pub fn push(&mut self, trade: TradeEvent) {
        if trade.is_sell {
            self.sell_volume += trade.quantity;
        } else {
            self.buy_volume += trade.quantity;
        }
        self.trades.push_back(trade);
        self.prune(trade.timestamp_ms);
    }

    /// Drop trades older than the window span relative to `now_ms`.
    pub fn prune(&mut self, now_ms: i64) {
        let cutoff = now_ms - self.span_ms;
        while let Some(front) = self.trades.front() {
            if front.timestamp_ms >= cutoff {
                break;
            }
            if front.is_sell {
                self.sell_volume -= front.quantity;
            } else {
                self.buy_volume -= front.quantity;
            }
            self.trades.pop_front();
        }
    }

    /// Buy share of the window in percent, `None` when there is no volume.
    pub fn buy_ratio(&self) -> Option<Decimal> {
        let total = self.buy_volume + self.sell_volume;
        if total.is_zero() {
            return None;
        }
        Some(self.buy_volume / total * Decimal::ONE_HUNDRED)
    }

    pub fn len(&self) -> usize {
        self.trades.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trades.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn aggregator() -> BucketAggregator {
        BucketAggregator::new(dec!(10), Duration::from_secs(60), 0)
    }

    #[test]
    fn nearby_prices_share_a_bucket() {
        let mut agg = aggregator();
        agg.ingest(&TradeEvent::buy(dec!(100.2), dec!(5), 1));
        agg.ingest(&TradeEvent::buy(dec!(100.4), dec!(3), 2));
        agg.ingest(&TradeEvent::sell(dec!(100.9), dec!(2), 3));

        let snap = agg.tick(60_000).expect("window elapsed");
        assert_eq!(snap.buckets.len(), 1);
        assert_eq!(
            snap.buckets[&dec!(100)],
            Bucket { buy_volume: dec!(8), sell_volume: dec!(2) }
        );
    }

    #[test]
    fn bucket_key_rounds_half_away_from_zero() {
        let agg = aggregator();
        assert_eq!(agg.bucket_key(dec!(104.99)), dec!(100));
        assert_eq!(agg.bucket_key(dec!(105)), dec!(110));
        assert_eq!(agg.bucket_key(dec!(95.01)), dec!(100));
    }

    #[test]
    fn tick_is_a_noop_before_the_interval() {
        let mut agg = aggregator();
        agg.ingest(&TradeEvent::buy(dec!(100), dec!(1), 1));
        assert!(agg.tick(59_999).is_none());
        assert_eq!(agg.live_bucket_count(), 1);
    }

    #[test]
    fn tick_resets_buckets_and_advances_window() {
        let mut agg = aggregator();
        agg.ingest(&TradeEvent::buy(dec!(100), dec!(1), 1));
        let snap = agg.tick(61_000).unwrap();
        assert_eq!(snap.window_start_ms, 0);
        assert_eq!(snap.window_end_ms, 61_000);
        assert_eq!(agg.window_start_ms(), 61_000);
        assert_eq!(agg.live_bucket_count(), 0);
        assert!(agg.tick(61_001).is_none());
    }

    #[test]
    fn empty_window_still_ticks() {
        let mut agg = aggregator();
        let snap = agg.tick(60_000).unwrap();
        assert!(snap.is_empty());
        assert!(snap.strongest().is_none());
    }

    #[test]
    fn strongest_picks_largest_total_then_lowest_price() {
        let mut agg = aggregator();
        agg.ingest(&TradeEvent::buy(dec!(200), dec!(4), 1));
        agg.ingest(&TradeEvent::sell(dec!(300), dec!(9), 1));
        agg.ingest(&TradeEvent::buy(dec!(100), dec!(9), 1));
        let snap = agg.tick(60_000).unwrap();
        let (price, bucket) = snap.strongest().unwrap();
        assert_eq!(price, dec!(100));
        assert_eq!(bucket.total(), dec!(9));
    }

    #[test]
    fn trade_window_ratio_and_pruning() {
        let mut window = TradeWindow::new(Duration::from_secs(10));
        assert_eq!(window.buy_ratio(), None);

        window.push(TradeEvent::buy(dec!(100), dec!(3), 0));
        window.push(TradeEvent::sell(dec!(100), dec!(1), 5_000));
        assert_eq!(window.buy_ratio(), Some(dec!(75)));

        // First trade falls out of the 10s window.
        window.push(TradeEvent::sell(dec!(100), dec!(1), 10_001));
        assert_eq!(window.len(), 2);
        assert_eq!(window.buy_ratio(), Some(dec!(0)));

        window.prune(30_000);
        assert!(window.is_empty());
        assert_eq!(window.buy_ratio(), None);
    }

    fn trade_strategy() -> impl Strategy<Value = (u32, u32, bool)> {
        (1u32..1_000_000, 1u32..100_000, any::<bool>())
    }

    proptest! {
        #[test]
        fn tick_conserves_volume(trades in prop::collection::vec(trade_strategy(), 0..200)) {
            let mut agg = aggregator();
            let mut expected = Decimal::ZERO;
            for (i, (price_cents, qty_milli, is_sell)) in trades.iter().enumerate() {
                let trade = TradeEvent {
                    price: Decimal::new(*price_cents as i64, 2),
                    quantity: Decimal::new(*qty_milli as i64, 3),
                    is_sell: *is_sell,
                    timestamp_ms: i as i64,
                };
                expected += trade.quantity;
                agg.ingest(&trade);
            }
            let snap = agg.tick(60_000).unwrap();
            prop_assert_eq!(snap.total_buy() + snap.total_sell(), expected);
            prop_assert_eq!(agg.live_bucket_count(), 0);
        }
    }
}

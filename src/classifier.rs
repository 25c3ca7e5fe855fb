//! Cluster classification.
//!
//! Maps the strongest bucket of a closed window plus the trailing buy ratio
//! to a [`Signal`]. Rules are evaluated top to bottom, first match wins:
//!
//! | # | condition                                                   | signal              |
//! |---|-------------------------------------------------------------|---------------------|
//! | 1 | buy ratio `>=` super ratio and buy `>=` super volume        | SUPER_BOOSTED_LONG  |
//! | 2 | sell ratio `>=` super ratio and sell `>=` super volume      | SUPER_BOOSTED_SHORT |
//! | 3 | buy `>=` boost                                              | BOOSTED_LONG        |
//! | 4 | sell `>=` boost                                             | BOOSTED_SHORT       |
//! | 5 | cluster volume `>` min alert: report, then alt boost `>=`,  | BOOSTED_* / LONG /  |
//! |   | then directional ratio `>=`                                 | SHORT / SKIP        |
//! | 6 | otherwise                                                   | SKIP                |

use crate::aggregator::BucketSnapshot;
use crate::config::SignalThresholds;
use crate::types::{Direction, Signal};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Ratio assumed when the trailing window holds no trades.
const NEUTRAL_RATIO: Decimal = dec!(50);

/// Informational report for a cluster that crossed the alert tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterAlert {
    pub bucket_price: Decimal,
    pub buy_volume: Decimal,
    pub sell_volume: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub signal: Signal,
    pub bucket_price: Decimal,
    pub buy_volume: Decimal,
    pub sell_volume: Decimal,
    pub buy_ratio: Decimal,
    pub alert: Option<ClusterAlert>,
}

impl Classification {
    fn skip(buy_ratio: Decimal) -> Self {
        Self {
            signal: Signal::Skip,
            bucket_price: Decimal::ZERO,
            buy_volume: Decimal::ZERO,
            sell_volume: Decimal::ZERO,
            buy_ratio,
            alert: None,
        }
    }

    pub fn sell_ratio(&self) -> Decimal {
        Decimal::ONE_HUNDRED - self.buy_ratio
    }

    /// Volume on the side the signal points to; zero for SKIP.
    pub fn side_volume(&self) -> Decimal {
        match self.signal.direction() {
            Some(Direction::Long) => self.buy_volume,
            Some(Direction::Short) => self.sell_volume,
            None => Decimal::ZERO,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SignalClassifier {
    thresholds: SignalThresholds,
}

impl SignalClassifier {
    pub fn new(thresholds: SignalThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &SignalThresholds {
        &self.thresholds
    }

    pub fn classify(&self, snapshot: &BucketSnapshot, buy_ratio: Option<Decimal>) -> Classification {
        let buy_ratio = buy_ratio.unwrap_or(NEUTRAL_RATIO);
        let Some((bucket_price, bucket)) = snapshot.strongest() else {
            return Classification::skip(buy_ratio);
        };

        let (signal, alert) =
            self.evaluate(bucket_price, bucket.buy_volume, bucket.sell_volume, buy_ratio);
        Classification {
            signal,
            bucket_price,
            buy_volume: bucket.buy_volume,
            sell_volume: bucket.sell_volume,
            buy_ratio,
            alert,
        }
    }

    fn evaluate(
        &self,
        bucket_price: Decimal,
        buy: Decimal,
        sell: Decimal,
        buy_ratio: Decimal,
    ) -> (Signal, Option<ClusterAlert>) {
        let t = &self.thresholds;
        let sell_ratio = Decimal::ONE_HUNDRED - buy_ratio;

        if buy_ratio >= t.super_boost_ratio && buy >= t.super_boost_volume {
            return (Signal::SuperBoostedLong, None);
        }
        if sell_ratio >= t.super_boost_ratio && sell >= t.super_boost_volume {
            return (Signal::SuperBoostedShort, None);
        }
        if buy >= t.boost_threshold {
            return (Signal::BoostedLong, None);
        }
        if sell >= t.boost_threshold {
            return (Signal::BoostedShort, None);
        }

        if buy + sell > t.min_cluster_alert {
            let alert = Some(ClusterAlert { bucket_price, buy_volume: buy, sell_volume: sell });
            let signal = if buy >= t.alt_boost_threshold {
                Signal::BoostedLong
            } else if sell >= t.alt_boost_threshold {
                Signal::BoostedShort
            } else if buy_ratio >= t.directional_ratio {
                Signal::Long
            } else if sell_ratio >= t.directional_ratio {
                Signal::Short
            } else {
                Signal::Skip
            };
            return (signal, alert);
        }

        (Signal::Skip, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::Bucket;
    use rustc_hash::FxHashMap;

    fn snapshot(buckets: &[(Decimal, Decimal, Decimal)]) -> BucketSnapshot {
        let buckets: FxHashMap<Decimal, Bucket> = buckets
            .iter()
            .map(|(p, b, s)| (*p, Bucket { buy_volume: *b, sell_volume: *s }))
            .collect();
        BucketSnapshot { buckets, window_start_ms: 0, window_end_ms: 60_000 }
    }

    fn classifier() -> SignalClassifier {
        SignalClassifier::new(SignalThresholds {
            super_boost_ratio: dec!(80),
            super_boost_volume: dec!(150),
            boost_threshold: dec!(65),
            alt_boost_threshold: dec!(50),
            min_cluster_alert: dec!(40),
            directional_ratio: dec!(60),
        })
    }

    #[test]
    fn empty_window_is_skip() {
        let c = classifier().classify(&BucketSnapshot::default(), None);
        assert_eq!(c.signal, Signal::Skip);
        assert!(c.alert.is_none());
    }

    #[test]
    fn zero_volume_buckets_are_skip() {
        let c = classifier().classify(&snapshot(&[(dec!(100), dec!(0), dec!(0))]), Some(dec!(50)));
        assert_eq!(c.signal, Signal::Skip);
    }

    #[test]
    fn boosted_long_at_threshold() {
        let c = classifier().classify(&snapshot(&[(dec!(100), dec!(70), dec!(5))]), Some(dec!(60)));
        assert_eq!(c.signal, Signal::BoostedLong);
        assert_eq!(c.side_volume(), dec!(70));

        // Inclusive at the boost tier.
        let c = classifier().classify(&snapshot(&[(dec!(100), dec!(65), dec!(0))]), Some(dec!(50)));
        assert_eq!(c.signal, Signal::BoostedLong);
    }

    #[test]
    fn boosted_short() {
        let c = classifier().classify(&snapshot(&[(dec!(100), dec!(1), dec!(66))]), Some(dec!(50)));
        assert_eq!(c.signal, Signal::BoostedShort);
        assert_eq!(c.side_volume(), dec!(66));
    }

    #[test]
    fn super_boost_requires_ratio_and_volume() {
        let c = classifier().classify(&snapshot(&[(dec!(100), dec!(150), dec!(10))]), Some(dec!(80)));
        assert_eq!(c.signal, Signal::SuperBoostedLong);

        // Volume alone is not enough.
        let c = classifier().classify(&snapshot(&[(dec!(100), dec!(200), dec!(10))]), Some(dec!(79.9)));
        assert_eq!(c.signal, Signal::BoostedLong);

        let c = classifier().classify(&snapshot(&[(dec!(100), dec!(5), dec!(160))]), Some(dec!(15)));
        assert_eq!(c.signal, Signal::SuperBoostedShort);
    }

    #[test]
    fn cluster_below_boost_is_informational() {
        let c = classifier().classify(&snapshot(&[(dec!(100), dec!(40), dec!(5))]), Some(dec!(55)));
        assert_ne!(c.signal, Signal::BoostedLong);
        assert_eq!(
            c.alert,
            Some(ClusterAlert { bucket_price: dec!(100), buy_volume: dec!(40), sell_volume: dec!(5) })
        );
        assert_eq!(c.signal, Signal::Skip);
    }

    #[test]
    fn informational_tier_is_strict() {
        let c = classifier().classify(&snapshot(&[(dec!(100), dec!(30), dec!(10))]), Some(dec!(75)));
        assert_eq!(c.signal, Signal::Skip);
        assert!(c.alert.is_none());
    }

    #[test]
    fn alt_boost_after_alert() {
        let c = classifier().classify(&snapshot(&[(dec!(100), dec!(55), dec!(5))]), Some(dec!(50)));
        assert_eq!(c.signal, Signal::BoostedLong);
        assert!(c.alert.is_some());

        let c = classifier().classify(&snapshot(&[(dec!(100), dec!(2), dec!(50))]), Some(dec!(50)));
        assert_eq!(c.signal, Signal::BoostedShort);
    }

    #[test]
    fn directional_tier_after_alert() {
        let c = classifier().classify(&snapshot(&[(dec!(100), dec!(40), dec!(5))]), Some(dec!(70)));
        assert_eq!(c.signal, Signal::Long);

        let c = classifier().classify(&snapshot(&[(dec!(100), dec!(10), dec!(35))]), Some(dec!(30)));
        assert_eq!(c.signal, Signal::Short);
    }

    #[test]
    fn uses_strongest_bucket_only() {
        let snap = snapshot(&[
            (dec!(100), dec!(30), dec!(30)),
            (dec!(110), dec!(64), dec!(0)),
            (dec!(120), dec!(10), dec!(2)),
        ]);
        let c = classifier().classify(&snap, Some(dec!(50)));
        assert_eq!(c.bucket_price, dec!(110));
        assert_eq!(c.signal, Signal::BoostedLong);
    }
}

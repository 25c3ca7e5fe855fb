//! Core market and signal types shared by every stage of the pipeline.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Wall-clock milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

// ============================================================================
// Trades
// ============================================================================

/// A single aggregated trade as seen on the exchange feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeEvent {
    pub price: Decimal,
    pub quantity: Decimal,
    /// True when the aggressor sold into the bid (buyer was the maker).
    pub is_sell: bool,
    pub timestamp_ms: i64,
}

impl TradeEvent {
    pub fn buy(price: Decimal, quantity: Decimal, timestamp_ms: i64) -> Self {
        Self { price, quantity, is_sell: false, timestamp_ms }
    }

    pub fn sell(price: Decimal, quantity: Decimal, timestamp_ms: i64) -> Self {
        Self { price, quantity, is_sell: true, timestamp_ms }
    }
}

/// Trade direction of a signal or position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "LONG",
            Direction::Short => "SHORT",
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Signals
// ============================================================================

/// Classifier output, produced fresh on every aggregation tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Signal {
    Long,
    Short,
    BoostedLong,
    BoostedShort,
    SuperBoostedLong,
    SuperBoostedShort,
    Skip,
}

impl Signal {
    pub fn direction(&self) -> Option<Direction> {
        match self {
            Signal::Long | Signal::BoostedLong | Signal::SuperBoostedLong => Some(Direction::Long),
            Signal::Short | Signal::BoostedShort | Signal::SuperBoostedShort => {
                Some(Direction::Short)
            }
            Signal::Skip => None,
        }
    }

    /// Boosted and super-boosted tiers; only these update impulse memory.
    pub fn is_boosted(&self) -> bool {
        matches!(
            self,
            Signal::BoostedLong
                | Signal::BoostedShort
                | Signal::SuperBoostedLong
                | Signal::SuperBoostedShort
        )
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, Signal::Skip)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Long => "LONG",
            Signal::Short => "SHORT",
            Signal::BoostedLong => "BOOSTED_LONG",
            Signal::BoostedShort => "BOOSTED_SHORT",
            Signal::SuperBoostedLong => "SUPER_BOOSTED_LONG",
            Signal::SuperBoostedShort => "SUPER_BOOSTED_SHORT",
            Signal::Skip => "SKIP",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Candidate
// ============================================================================

/// A signal that survived arbitration, with the numbers that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub symbol: String,
    pub signal: Signal,
    /// Volume on the signal's side of the strongest bucket.
    pub side_volume: Decimal,
    pub bucket_price: Decimal,
    pub buy_volume: Decimal,
    pub sell_volume: Decimal,
    /// Trailing buy ratio in percent.
    pub buy_ratio: Decimal,
    pub timestamp_ms: i64,
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} @ {} | buy {} / sell {} | buy ratio {}%",
            self.symbol,
            self.signal,
            self.bucket_price,
            self.buy_volume,
            self.sell_volume,
            self.buy_ratio.round_dp(1),
        )
    }
}

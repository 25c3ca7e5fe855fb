//! Order placement.
//!
//! The forwarder only needs `open_long` / `open_short`. Both are idempotent
//! against an already-open position in the same direction. The exit monitor
//! lists positions and closes them. The shipped implementation is a paper
//! broker that tracks positions in memory.

use async_trait::async_trait;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::info;

use crate::types::Direction;

#[derive(Debug, Error, PartialEq)]
pub enum BrokerError {
    #[error("order size must be positive, got {0}")]
    InvalidSize(Decimal),

    #[error("order rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderOutcome {
    Opened,
    /// A same-direction position exists; nothing was sent.
    AlreadyOpen,
}

#[async_trait]
pub trait OrderPlacer: Send + Sync {
    async fn open_long(&self, symbol: &str, usd: Decimal) -> Result<OrderOutcome, BrokerError>;
    async fn open_short(&self, symbol: &str, usd: Decimal) -> Result<OrderOutcome, BrokerError>;

    async fn open(&self, symbol: &str, direction: Direction, usd: Decimal) -> Result<OrderOutcome, BrokerError> {
        match direction {
            Direction::Long => self.open_long(symbol, usd).await,
            Direction::Short => self.open_short(symbol, usd).await,
        }
    }

    /// Close the open position on `symbol`. `None` if there was nothing to close.
    async fn close(&self, symbol: &str) -> Result<Option<Position>, BrokerError>;

    async fn positions(&self) -> Vec<Position>;
}

// =============================================================================
// Paper broker
// =============================================================================

#[derive(Debug, Clone)]
pub struct Position {
    pub symbol: String,
    pub direction: Direction,
    pub size_usd: Decimal,
    pub opened_at: Instant,
}

impl Position {
    pub fn age(&self) -> Duration {
        self.opened_at.elapsed()
    }
}

/// In-memory broker for mock trading. An opposite-direction order flips the
/// position.
#[derive(Default, Clone)]
pub struct PaperBroker {
    positions: Arc<RwLock<FxHashMap<String, Position>>>,
}

impl PaperBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self, symbol: &str) -> Option<Position> {
        self.positions.read().get(symbol).cloned()
    }

    pub fn open_positions(&self) -> usize {
        self.positions.read().len()
    }

    fn place(&self, symbol: &str, direction: Direction, usd: Decimal) -> Result<OrderOutcome, BrokerError> {
        if usd <= Decimal::ZERO {
            return Err(BrokerError::InvalidSize(usd));
        }

        let mut positions = self.positions.write();
        if let Some(existing) = positions.get(symbol) {
            if existing.direction == direction {
                info!(symbol, %direction, "position already open, skipping order");
                return Ok(OrderOutcome::AlreadyOpen);
            }
            info!(symbol, from = %existing.direction, to = %direction, "flipping paper position");
        }

        positions.insert(
            symbol.to_string(),
            Position {
                symbol: symbol.to_string(),
                direction,
                size_usd: usd,
                opened_at: Instant::now(),
            },
        );
        info!(symbol, %direction, size_usd = %usd, "📝 paper position opened");
        Ok(OrderOutcome::Opened)
    }
}

#[async_trait]
impl OrderPlacer for PaperBroker {
    async fn open_long(&self, symbol: &str, usd: Decimal) -> Result<OrderOutcome, BrokerError> {
        self.place(symbol, Direction::Long, usd)
    }

    async fn open_short(&self, symbol: &str, usd: Decimal) -> Result<OrderOutcome, BrokerError> {
        self.place(symbol, Direction::Short, usd)
    }

    async fn close(&self, symbol: &str) -> Result<Option<Position>, BrokerError> {
        let closed = self.positions.write().remove(symbol);
        if let Some(pos) = &closed {
            info!(symbol, direction = %pos.direction, held_secs = pos.age().as_secs(), "📕 paper position closed");
        }
        Ok(closed)
    }

    async fn positions(&self) -> Vec<Position> {
        self.positions.read().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn same_direction_is_a_noop() {
        let broker = PaperBroker::new();
        assert_eq!(broker.open_long("BTCUSDT", dec!(100)).await, Ok(OrderOutcome::Opened));
        assert_eq!(broker.open_long("BTCUSDT", dec!(250)).await, Ok(OrderOutcome::AlreadyOpen));

        let pos = broker.position("BTCUSDT").unwrap();
        assert_eq!(pos.direction, Direction::Long);
        assert_eq!(pos.size_usd, dec!(100));
        assert_eq!(broker.open_positions(), 1);
    }

    #[tokio::test]
    async fn opposite_direction_flips() {
        let broker = PaperBroker::new();
        broker.open_long("ETHUSDT", dec!(100)).await.unwrap();
        assert_eq!(broker.open_short("ETHUSDT", dec!(50)).await, Ok(OrderOutcome::Opened));
        assert_eq!(broker.position("ETHUSDT").unwrap().direction, Direction::Short);
    }

    #[tokio::test]
    async fn symbols_are_independent() {
        let broker = PaperBroker::new();
        broker.open("BTCUSDT", Direction::Long, dec!(10)).await.unwrap();
        assert_eq!(
            broker.open("SOLUSDT", Direction::Long, dec!(10)).await,
            Ok(OrderOutcome::Opened)
        );
        assert_eq!(broker.open_positions(), 2);
    }

    #[tokio::test]
    async fn rejects_non_positive_size() {
        let broker = PaperBroker::new();
        assert_eq!(
            broker.open_short("BTCUSDT", Decimal::ZERO).await,
            Err(BrokerError::InvalidSize(Decimal::ZERO))
        );
        assert!(broker.position("BTCUSDT").is_none());
    }

    #[tokio::test]
    async fn close_then_reopen() {
        let broker = PaperBroker::new();
        broker.open_long("BTCUSDT", dec!(100)).await.unwrap();

        let closed = broker.close("BTCUSDT").await.unwrap().unwrap();
        assert_eq!(closed.direction, Direction::Long);
        assert!(broker.positions().await.is_empty());
        assert!(broker.close("BTCUSDT").await.unwrap().is_none());

        // A fresh same-direction order opens again instead of being skipped.
        assert_eq!(broker.open_long("BTCUSDT", dec!(100)).await, Ok(OrderOutcome::Opened));
        assert_eq!(broker.positions().await.len(), 1);
    }
}

//! Impulse memory and trade cooldown.
//!
//! Both pieces of state are single-slot and live for the whole process. They
//! sit behind one mutex ([`SharedArbiter`]) so the stream task and the
//! forwarder never see a half-updated view, and two tasks can not both pass
//! the cooldown gate for the same window.

use crate::config::ArbitrationConfig;
use crate::types::{Direction, Signal};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info};

pub type SharedArbiter = Arc<Mutex<Arbiter>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImpulseSide {
    Buy,
    Sell,
    None,
}

impl From<Direction> for ImpulseSide {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Long => ImpulseSide::Buy,
            Direction::Short => ImpulseSide::Sell,
        }
    }
}

/// Most recent boosted impulse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImpulseMemory {
    pub side: ImpulseSide,
    pub volume: Decimal,
    pub timestamp_ms: i64,
}

impl Default for ImpulseMemory {
    fn default() -> Self {
        Self { side: ImpulseSide::None, volume: Decimal::ZERO, timestamp_ms: 0 }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CooldownState {
    /// `None` until the first permitted trade.
    pub last_trade_timestamp_ms: Option<i64>,
}

#[derive(Debug)]
pub struct Arbiter {
    impulse: ImpulseMemory,
    cooldown: CooldownState,
    impulse_volume_min: Decimal,
    recent_impulse_timeout_ms: i64,
    cooldown_ms: i64,
}

impl Arbiter {
    pub fn new(cfg: &ArbitrationConfig) -> Self {
        Self {
            impulse: ImpulseMemory::default(),
            cooldown: CooldownState::default(),
            impulse_volume_min: cfg.impulse_volume_min,
            recent_impulse_timeout_ms: cfg.recent_impulse_timeout.as_millis() as i64,
            cooldown_ms: cfg.cooldown.as_millis() as i64,
        }
    }

    pub fn shared(cfg: &ArbitrationConfig) -> SharedArbiter {
        Arc::new(Mutex::new(Self::new(cfg)))
    }

    /// Veto signals that run into a recent opposite impulse, and remember
    /// boosted signals as the new impulse.
    pub fn arbitrate(&mut self, signal: Signal, side_volume: Decimal, now_ms: i64) -> Signal {
        let Some(direction) = signal.direction() else {
            return Signal::Skip;
        };

        let opposing = ImpulseSide::from(direction.opposite());
        let impulse = self.impulse;
        if impulse.side == opposing
            && impulse.volume >= self.impulse_volume_min
            && now_ms - impulse.timestamp_ms < self.recent_impulse_timeout_ms
        {
            info!(
                signal = %signal,
                impulse_side = ?impulse.side,
                impulse_volume = %impulse.volume,
                age_ms = now_ms - impulse.timestamp_ms,
                "signal vetoed by recent opposite impulse"
            );
            return Signal::Skip;
        }

        if signal.is_boosted() {
            self.impulse = ImpulseMemory {
                side: ImpulseSide::from(direction),
                volume: side_volume,
                timestamp_ms: now_ms,
            };
            debug!(signal = %signal, volume = %side_volume, "impulse memory updated");
        }

        signal
    }

    /// Returns true at most once per cooldown window and stamps the time when
    /// it does.
    pub fn is_cooldown_ready(&mut self, now_ms: i64) -> bool {
        let ready = match self.cooldown.last_trade_timestamp_ms {
            Some(last) => now_ms - last >= self.cooldown_ms,
            None => true,
        };
        if ready {
            self.cooldown.last_trade_timestamp_ms = Some(now_ms);
        }
        ready
    }

    pub fn impulse(&self) -> ImpulseMemory {
        self.impulse
    }

    pub fn cooldown(&self) -> CooldownState {
        self.cooldown
    }

    pub fn last_trade_ms(&self) -> Option<i64> {
        self.cooldown.last_trade_timestamp_ms
    }

    /// Milliseconds until the cooldown gate opens again; zero when ready.
    pub fn cooldown_remaining_ms(&self, now_ms: i64) -> i64 {
        match self.cooldown.last_trade_timestamp_ms {
            Some(last) => (self.cooldown_ms - (now_ms - last)).max(0),
            None => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn arbiter() -> Arbiter {
        Arbiter::new(&ArbitrationConfig {
            impulse_volume_min: dec!(65),
            recent_impulse_timeout: Duration::from_secs(120),
            cooldown: Duration::from_secs(300),
        })
    }

    #[test]
    fn boosted_long_vetoes_short_inside_timeout() {
        let mut arb = arbiter();
        assert_eq!(arb.arbitrate(Signal::BoostedLong, dec!(70), 1_000), Signal::BoostedLong);
        assert_eq!(arb.impulse().side, ImpulseSide::Buy);

        assert_eq!(arb.arbitrate(Signal::Short, dec!(80), 60_000), Signal::Skip);
        assert_eq!(arb.arbitrate(Signal::SuperBoostedShort, dec!(500), 120_999), Signal::Skip);
    }

    #[test]
    fn veto_expires_after_timeout() {
        let mut arb = arbiter();
        arb.arbitrate(Signal::BoostedLong, dec!(70), 1_000);
        assert_eq!(arb.arbitrate(Signal::Short, dec!(80), 121_000), Signal::Short);
    }

    #[test]
    fn small_impulse_does_not_veto() {
        let mut arb = arbiter();
        arb.arbitrate(Signal::BoostedShort, dec!(64.9), 0);
        assert_eq!(arb.arbitrate(Signal::Long, dec!(10), 1_000), Signal::Long);
    }

    #[test]
    fn same_direction_is_never_vetoed() {
        let mut arb = arbiter();
        arb.arbitrate(Signal::SuperBoostedLong, dec!(300), 0);
        assert_eq!(arb.arbitrate(Signal::Long, dec!(1), 10), Signal::Long);
        assert_eq!(arb.arbitrate(Signal::BoostedLong, dec!(90), 20), Signal::BoostedLong);
        assert_eq!(arb.impulse().volume, dec!(90));
        assert_eq!(arb.impulse().timestamp_ms, 20);
    }

    #[test]
    fn plain_signals_do_not_touch_memory() {
        let mut arb = arbiter();
        arb.arbitrate(Signal::Long, dec!(500), 5);
        arb.arbitrate(Signal::Short, dec!(500), 6);
        assert_eq!(arb.impulse(), ImpulseMemory::default());
    }

    #[test]
    fn vetoed_signal_does_not_overwrite_impulse() {
        let mut arb = arbiter();
        arb.arbitrate(Signal::BoostedLong, dec!(100), 0);
        assert_eq!(arb.arbitrate(Signal::BoostedShort, dec!(200), 1), Signal::Skip);
        assert_eq!(arb.impulse().side, ImpulseSide::Buy);
    }

    #[test]
    fn skip_passes_through() {
        let mut arb = arbiter();
        assert_eq!(arb.arbitrate(Signal::Skip, dec!(1000), 0), Signal::Skip);
        assert_eq!(arb.impulse(), ImpulseMemory::default());
    }

    #[test]
    fn cooldown_fires_once_per_window() {
        let mut arb = arbiter();
        assert!(arb.is_cooldown_ready(10_000));
        assert!(!arb.is_cooldown_ready(10_001));
        assert!(!arb.is_cooldown_ready(309_999));
        assert_eq!(arb.cooldown().last_trade_timestamp_ms, Some(10_000));
        assert_eq!(arb.cooldown_remaining_ms(160_000), 150_000);

        assert!(arb.is_cooldown_ready(310_000));
        assert!(!arb.is_cooldown_ready(310_000));
    }

    #[test]
    fn shared_arbiter_gate_is_exclusive_across_threads() {
        let shared = Arbiter::shared(&ArbitrationConfig::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let shared = shared.clone();
                std::thread::spawn(move || shared.lock().is_cooldown_ready(42))
            })
            .collect();
        let passed = handles.into_iter().map(|h| h.join().unwrap()).filter(|ok| *ok).count();
        assert_eq!(passed, 1);
    }
}

use rand::Rng;
use std::time::Duration;

pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Capped exponential backoff with up to 10% random jitter.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
    jitter: bool,
    attempts: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_BACKOFF, DEFAULT_MAX_BACKOFF)
    }
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max, current: initial, jitter: true, attempts: 0 }
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    pub fn next_delay(&mut self) -> Duration {
        let base = self.current;
        self.current = (self.current * 2).min(self.max);
        self.attempts += 1;

        let delay = if self.jitter {
            let spread = base.as_millis() as u64 / 10;
            let extra = if spread > 0 { rand::thread_rng().gen_range(0..=spread) } else { 0 };
            base + Duration::from_millis(extra)
        } else {
            base
        };
        delay.min(self.max)
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

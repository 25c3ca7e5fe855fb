//! Trade-to-candidate pipeline owned by the stream task.
//!
//! The aggregator and trailing window are never shared; only the arbiter is,
//! so the forwarder's cooldown check sees the same state arbitration writes.

use tracing::{debug, info};

use crate::aggregator::{BucketAggregator, TradeWindow};
use crate::arbitration::SharedArbiter;
use crate::classifier::{ClusterAlert, SignalClassifier};
use crate::config::{AggregationConfig, SignalThresholds};
use crate::types::{Candidate, Signal, TradeEvent};

/// What one trade or timer tick produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineOutput {
    pub candidate: Option<Candidate>,
    pub alert: Option<ClusterAlert>,
}

impl PipelineOutput {
    pub fn is_empty(&self) -> bool {
        self.candidate.is_none() && self.alert.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStats {
    pub trades: u64,
    pub ticks: u64,
    pub candidates: u64,
    pub last_signal: Signal,
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self { trades: 0, ticks: 0, candidates: 0, last_signal: Signal::Skip }
    }
}

pub struct Pipeline {
    symbol: String,
    aggregator: BucketAggregator,
    window: TradeWindow,
    classifier: SignalClassifier,
    arbiter: SharedArbiter,
    stats: PipelineStats,
}

impl Pipeline {
    pub fn new(
        symbol: impl Into<String>,
        aggregation: &AggregationConfig,
        thresholds: SignalThresholds,
        arbiter: SharedArbiter,
        now_ms: i64,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            aggregator: BucketAggregator::new(aggregation.bucket_size, aggregation.interval, now_ms),
            window: TradeWindow::new(aggregation.ratio_window),
            classifier: SignalClassifier::new(thresholds),
            arbiter,
            stats: PipelineStats::default(),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    /// Close the window first if the trade's timestamp is past it, so the
    /// trade lands in the new window.
    pub fn on_trade(&mut self, trade: TradeEvent) -> PipelineOutput {
        let output = self.on_timer(trade.timestamp_ms);
        self.stats.trades += 1;
        self.aggregator.ingest(&trade);
        self.window.push(trade);
        output
    }

    pub fn on_timer(&mut self, now_ms: i64) -> PipelineOutput {
        let Some(snapshot) = self.aggregator.tick(now_ms) else {
            return PipelineOutput::default();
        };
        self.stats.ticks += 1;
        self.window.prune(now_ms);

        let classification = self.classifier.classify(&snapshot, self.window.buy_ratio());
        debug!(
            symbol = %self.symbol,
            buckets = snapshot.buckets.len(),
            total_buy = %snapshot.total_buy(),
            total_sell = %snapshot.total_sell(),
            raw_signal = %classification.signal,
            "window closed"
        );

        let signal = self.arbiter.lock().arbitrate(
            classification.signal,
            classification.side_volume(),
            now_ms,
        );
        self.stats.last_signal = signal;

        let candidate = (!signal.is_skip()).then(|| {
            self.stats.candidates += 1;
            let candidate = Candidate {
                symbol: self.symbol.clone(),
                signal,
                side_volume: classification.side_volume(),
                bucket_price: classification.bucket_price,
                buy_volume: classification.buy_volume,
                sell_volume: classification.sell_volume,
                buy_ratio: classification.buy_ratio,
                timestamp_ms: now_ms,
            };
            info!(
                symbol = %self.symbol,
                signal = %signal,
                bucket = %candidate.bucket_price,
                buy = %candidate.buy_volume,
                sell = %candidate.sell_volume,
                "🎯 candidate"
            );
            candidate
        });

        PipelineOutput { candidate, alert: classification.alert }
    }
}

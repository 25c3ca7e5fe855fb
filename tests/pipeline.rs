//! Trades in, journal rows and paper positions out.

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

use cluster_signal_bot::arbitration::Arbiter;
use cluster_signal_bot::binance_feed::decode_agg_trade;
use cluster_signal_bot::broker::PaperBroker;
use cluster_signal_bot::config::{AggregationConfig, ArbitrationConfig, SignalThresholds};
use cluster_signal_bot::context::{ContextCache, MarketContext};
use cluster_signal_bot::forwarder::{DecisionForwarder, ForwardOutcome};
use cluster_signal_bot::journal::{JournalAction, JsonlJournal, JournalRow};
use cluster_signal_bot::notifier::Notifier;
use cluster_signal_bot::oracle::{DecisionOracle, OracleError, PassthroughOracle};
use cluster_signal_bot::pipeline::Pipeline;
use cluster_signal_bot::{Candidate, Decision, Direction, Signal};

#[derive(Default)]
struct Inbox(Mutex<Vec<String>>);

#[async_trait]
impl Notifier for Inbox {
    async fn send(&self, message: &str) {
        self.0.lock().push(message.to_string());
    }
}

/// Agrees with the classifier, but never on plain LONG/SHORT.
struct BoostedOnly;

#[async_trait]
impl DecisionOracle for BoostedOnly {
    async fn decide(&self, c: &Candidate, _: Option<&MarketContext>) -> Result<Decision, OracleError> {
        Ok(if c.signal.is_boosted() { Decision::from(c.signal) } else { Decision::Skip })
    }
}

fn frame(price: &str, qty: &str, sell: bool, ts: i64) -> String {
    format!(r#"{{"e":"aggTrade","E":{ts},"s":"BTCUSDT","p":"{price}","q":"{qty}","m":{sell},"T":{ts}}}"#)
}

fn pipeline(arbitration: &ArbitrationConfig) -> (Pipeline, cluster_signal_bot::arbitration::SharedArbiter) {
    let arbiter = Arbiter::shared(arbitration);
    let aggregation = AggregationConfig {
        bucket_size: dec!(10),
        interval: Duration::from_secs(60),
        ratio_window: Duration::from_secs(30),
    };
    let p = Pipeline::new("BTCUSDT", &aggregation, SignalThresholds::default(), arbiter.clone(), 0);
    (p, arbiter)
}

#[tokio::test]
async fn frames_flow_through_to_a_paper_position() {
    let dir = tempfile::tempdir().unwrap();
    let journal_path = dir.path().join("journal.jsonl");

    let (mut pipeline, arbiter) = pipeline(&ArbitrationConfig::default());
    let broker = PaperBroker::new();
    let inbox = Arc::new(Inbox::default());
    let forwarder = DecisionForwarder::new(
        Arc::new(BoostedOnly),
        Arc::new(broker.clone()),
        inbox.clone(),
        Arc::new(JsonlJournal::new(&journal_path)),
        arbiter,
        ContextCache::new(),
        dec!(100),
        true,
    );

    let frames = [
        frame("64001.2", "40", false, 40_000),
        frame("64004.9", "35", false, 45_000),
        frame("64003.0", "4", true, 50_000),
        // Past the first window boundary: closes it.
        frame("64010.0", "1", true, 61_000),
    ];

    let mut candidates = Vec::new();
    for text in &frames {
        let trade = decode_agg_trade(text).unwrap();
        if let Some(c) = pipeline.on_trade(trade).candidate {
            candidates.push(c);
        }
    }

    assert_eq!(candidates.len(), 1);
    let candidate = &candidates[0];
    assert_eq!(candidate.signal, Signal::BoostedLong);
    assert_eq!(candidate.bucket_price, dec!(64000));
    assert_eq!(candidate.buy_volume, dec!(75));

    let outcome = forwarder.handle(candidate).await;
    assert_eq!(outcome, ForwardOutcome::Opened(Direction::Long));
    assert_eq!(broker.position("BTCUSDT").unwrap().size_usd, dec!(100));

    let text = std::fs::read_to_string(&journal_path).unwrap();
    let rows: Vec<JournalRow> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].action, JournalAction::Opened);
    assert_eq!(rows[0].decision, Decision::BoostedLong);

    let messages = inbox.0.lock().clone();
    assert!(messages.iter().any(|m| m.contains("Signal Detected")));
    assert!(messages.iter().any(|m| m.contains("cache not warm")));
}

#[tokio::test]
async fn veto_then_cooldown_keep_the_bot_out() {
    let arbitration = ArbitrationConfig {
        impulse_volume_min: dec!(65),
        recent_impulse_timeout: Duration::from_secs(120),
        cooldown: Duration::from_secs(3600),
    };
    let (mut pipeline, arbiter) = pipeline(&arbitration);
    let dir = tempfile::tempdir().unwrap();
    let broker = PaperBroker::new();
    let forwarder = DecisionForwarder::new(
        Arc::new(PassthroughOracle),
        Arc::new(broker.clone()),
        Arc::new(Inbox::default()),
        Arc::new(JsonlJournal::new(dir.path().join("j.jsonl"))),
        arbiter,
        ContextCache::new(),
        dec!(100),
        true,
    );

    // Window 1: heavy buying.
    pipeline.on_trade(decode_agg_trade(&frame("100", "80", false, 1_000)).unwrap());
    let first = pipeline.on_timer(60_000).candidate.unwrap();
    assert_eq!(forwarder.handle(&first).await, ForwardOutcome::Opened(Direction::Long));

    // Window 2: heavy selling inside the impulse timeout is vetoed.
    pipeline.on_trade(decode_agg_trade(&frame("100", "90", true, 61_000)).unwrap());
    assert!(pipeline.on_timer(120_000).candidate.is_none());

    // This trade first closes an empty third window, then opens the fourth.
    // By its close the impulse has expired, but the cooldown has not.
    pipeline.on_trade(decode_agg_trade(&frame("100", "90", true, 200_000)).unwrap());
    let later = pipeline.on_timer(260_000).candidate.unwrap();
    assert_eq!(later.signal, Signal::BoostedShort);
    assert!(matches!(forwarder.handle(&later).await, ForwardOutcome::CooldownBlocked { .. }));
    assert_eq!(broker.position("BTCUSDT").unwrap().direction, Direction::Long);
}

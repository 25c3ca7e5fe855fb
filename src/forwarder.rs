//! Decision forwarder: candidate → oracle → cooldown gate → order.
//!
//! Runs on its own task so oracle latency and order placement never touch the
//! stream's read loop. Every failure is logged, notified and journaled; none
//! of them end the loop.

use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::arbitration::SharedArbiter;
use crate::broker::{OrderOutcome, OrderPlacer};
use crate::context::ContextCache;
use crate::decision::Decision;
use crate::journal::{JournalAction, JournalRow, RowSink};
use crate::notifier::Notifier;
use crate::oracle::DecisionOracle;
use crate::supervisor::Shutdown;
use crate::types::{Candidate, Direction, now_ms};

#[derive(Debug, Clone, PartialEq)]
pub enum ForwardOutcome {
    Skipped(Decision),
    CooldownBlocked { remaining_ms: i64 },
    Opened(Direction),
    AlreadyOpen(Direction),
    OrderFailed(String),
}

impl ForwardOutcome {
    fn journal_action(&self) -> JournalAction {
        match self {
            ForwardOutcome::Skipped(_) => JournalAction::Skipped,
            ForwardOutcome::CooldownBlocked { .. } => JournalAction::CooldownBlocked,
            ForwardOutcome::Opened(_) => JournalAction::Opened,
            ForwardOutcome::AlreadyOpen(_) => JournalAction::AlreadyOpen,
            ForwardOutcome::OrderFailed(_) => JournalAction::OrderFailed,
        }
    }
}

pub struct DecisionForwarder {
    oracle: Arc<dyn DecisionOracle>,
    broker: Arc<dyn OrderPlacer>,
    notifier: Arc<dyn Notifier>,
    journal: Arc<dyn RowSink>,
    arbiter: SharedArbiter,
    context: ContextCache,
    order_usd: Decimal,
    mock: bool,
}

impl DecisionForwarder {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        oracle: Arc<dyn DecisionOracle>,
        broker: Arc<dyn OrderPlacer>,
        notifier: Arc<dyn Notifier>,
        journal: Arc<dyn RowSink>,
        arbiter: SharedArbiter,
        context: ContextCache,
        order_usd: Decimal,
        mock: bool,
    ) -> Self {
        Self { oracle, broker, notifier, journal, arbiter, context, order_usd, mock }
    }

    pub async fn handle(&self, candidate: &Candidate) -> ForwardOutcome {
        let symbol = candidate.symbol.as_str();
        self.notifier.notify_signal(candidate).await;

        let context = self.context.get().await;
        if context.is_none() {
            warn!(symbol, "context cache not warm");
            self.notifier
                .notify_degraded(&format!("{}: market context cache not warm, asking oracle without it", symbol))
                .await;
        }

        let decision = match self.oracle.decide(candidate, context.as_ref()).await {
            Ok(d) => d,
            Err(e) => {
                warn!(symbol, error = %e, "oracle failed, treating as SKIP");
                Decision::Skip
            }
        };
        info!(symbol, signal = %candidate.signal, %decision, actionable = decision.is_actionable(), "oracle decided");
        self.notifier.notify_decision(symbol, decision).await;

        let (outcome, note) = self.act(candidate, decision).await;
        self.record(candidate, decision, &outcome, note).await;
        outcome
    }

    async fn act(&self, candidate: &Candidate, decision: Decision) -> (ForwardOutcome, String) {
        let symbol = candidate.symbol.as_str();
        let Some(direction) = decision.direction() else {
            return (ForwardOutcome::Skipped(decision), String::new());
        };

        let now = now_ms();
        let blocked = {
            let mut arbiter = self.arbiter.lock();
            if arbiter.is_cooldown_ready(now) {
                None
            } else {
                Some(arbiter.cooldown_remaining_ms(now))
            }
        };
        if let Some(remaining_ms) = blocked {
            let reason = format!("cooldown active, {}s remaining", remaining_ms / 1000);
            info!(symbol, decision = %decision, remaining_ms, "🛑 order withheld by cooldown");
            self.notifier.notify_blocked(symbol, &reason).await;
            return (ForwardOutcome::CooldownBlocked { remaining_ms }, reason);
        }

        let broker = self.broker.clone();
        let order_symbol = candidate.symbol.clone();
        let usd = self.order_usd;
        let placed =
            tokio::spawn(async move { broker.open(&order_symbol, direction, usd).await }).await;

        match placed {
            Ok(Ok(OrderOutcome::Opened)) => {
                info!(symbol, %direction, usd = %usd, mock = self.mock, "position opened");
                self.notifier.notify_trade(symbol, direction, usd, self.mock).await;
                (ForwardOutcome::Opened(direction), String::new())
            }
            Ok(Ok(OrderOutcome::AlreadyOpen)) => {
                (ForwardOutcome::AlreadyOpen(direction), "same-direction position already open".into())
            }
            Ok(Err(e)) => {
                error!(symbol, %direction, error = %e, "order failed");
                self.notifier.notify_failed(symbol, &e.to_string()).await;
                (ForwardOutcome::OrderFailed(e.to_string()), e.to_string())
            }
            Err(e) => {
                error!(symbol, %direction, error = %e, "order task aborted");
                self.notifier.notify_failed(symbol, &e.to_string()).await;
                (ForwardOutcome::OrderFailed(e.to_string()), e.to_string())
            }
        }
    }

    async fn record(&self, candidate: &Candidate, decision: Decision, outcome: &ForwardOutcome, note: String) {
        let row = JournalRow::new(candidate, decision, outcome.journal_action(), note);
        if let Err(e) = self.journal.append(&row).await {
            warn!(error = %e, "failed to journal decision");
        }
    }
}

/// Drain the candidate channel until shutdown or until every sender is gone.
pub async fn run_forwarder(
    candidates: &mut mpsc::Receiver<Candidate>,
    forwarder: &DecisionForwarder,
    mut shutdown: Shutdown,
) -> anyhow::Result<()> {
    loop {
        tokio::select! {
            _ = shutdown.changed() => return Ok(()),
            next = candidates.recv() => {
                let Some(candidate) = next else {
                    info!("candidate channel closed");
                    return Ok(());
                };
                let outcome = forwarder.handle(&candidate).await;
                info!(symbol = %candidate.symbol, signal = %candidate.signal, ?outcome, "candidate handled");
            }
        }
    }
}

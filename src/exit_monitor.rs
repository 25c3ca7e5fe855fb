//! Closes open positions once they have been held too long or the
//! futures/spot basis has converged.

use rust_decimal::Decimal;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::broker::{OrderPlacer, Position};
use crate::config::ExitConfig;
use crate::context::ContextCache;
use crate::notifier::Notifier;
use crate::supervisor::Shutdown;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    MaxHold,
    BasisConverged,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::MaxHold => write!(f, "max hold time reached"),
            ExitReason::BasisConverged => write!(f, "basis converged"),
        }
    }
}

/// Max hold wins over basis; a missing basis never closes anything.
pub fn should_exit(age: Duration, basis_pct: Option<Decimal>, policy: &ExitConfig) -> Option<ExitReason> {
    if age >= policy.max_hold {
        return Some(ExitReason::MaxHold);
    }
    match (policy.basis_exit_pct, basis_pct) {
        (Some(limit), Some(basis)) if basis.abs() <= limit => Some(ExitReason::BasisConverged),
        _ => None,
    }
}

/// One pass over the broker's positions. Returns what was closed.
pub async fn check_positions(
    broker: &dyn OrderPlacer,
    context: &ContextCache,
    notifier: &dyn Notifier,
    policy: &ExitConfig,
) -> Vec<(Position, ExitReason)> {
    let positions = broker.positions().await;
    if positions.is_empty() {
        return Vec::new();
    }
    let basis = context.get().await.map(|ctx| ctx.basis_pct());

    let mut closed = Vec::new();
    for pos in positions {
        let Some(reason) = should_exit(pos.age(), basis, policy) else {
            continue;
        };
        match broker.close(&pos.symbol).await {
            Ok(Some(gone)) => {
                info!(symbol = %gone.symbol, direction = %gone.direction, %reason, "closing position");
                notifier
                    .notify_closed(&gone.symbol, gone.direction, gone.age(), &reason.to_string())
                    .await;
                closed.push((gone, reason));
            }
            Ok(None) => {}
            Err(e) => {
                warn!(symbol = %pos.symbol, error = %e, "close failed");
                notifier.notify_failed(&pos.symbol, &e.to_string()).await;
            }
        }
    }
    closed
}

pub async fn run_exit_monitor(
    broker: Arc<dyn OrderPlacer>,
    context: ContextCache,
    notifier: Arc<dyn Notifier>,
    policy: ExitConfig,
    mut shutdown: Shutdown,
) -> anyhow::Result<()> {
    let mut ticker = tokio::time::interval(policy.check_every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.changed() => return Ok(()),
            _ = ticker.tick() => {}
        }
        check_positions(broker.as_ref(), &context, notifier.as_ref(), &policy).await;
    }
}

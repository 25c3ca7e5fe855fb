//! Append-only decision journal.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use crate::decision::Decision;
use crate::types::{Candidate, Signal};

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("journal io: {0}")]
    Io(#[from] std::io::Error),

    #[error("journal encode: {0}")]
    Encode(#[from] serde_json::Error),
}

/// What happened to a candidate after the oracle answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalAction {
    Skipped,
    CooldownBlocked,
    Opened,
    AlreadyOpen,
    OrderFailed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalRow {
    pub timestamp: String,
    pub symbol: String,
    pub signal: Signal,
    pub decision: Decision,
    pub action: JournalAction,
    pub bucket_price: Decimal,
    pub buy_volume: Decimal,
    pub sell_volume: Decimal,
    pub buy_ratio: Decimal,
    pub note: String,
}

impl JournalRow {
    pub fn new(candidate: &Candidate, decision: Decision, action: JournalAction, note: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            symbol: candidate.symbol.clone(),
            signal: candidate.signal,
            decision,
            action,
            bucket_price: candidate.bucket_price,
            buy_volume: candidate.buy_volume,
            sell_volume: candidate.sell_volume,
            buy_ratio: candidate.buy_ratio.round_dp(2),
            note: note.into(),
        }
    }
}

#[async_trait]
pub trait RowSink: Send + Sync {
    async fn append(&self, row: &JournalRow) -> Result<(), JournalError>;
}

/// One JSON object per line, appended to a local file.
pub struct JsonlJournal {
    path: PathBuf,
    // Serialises appends so concurrent writers never interleave lines.
    lock: tokio::sync::Mutex<()>,
}

impl JsonlJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), lock: tokio::sync::Mutex::new(()) }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[async_trait]
impl RowSink for JsonlJournal {
    async fn append(&self, row: &JournalRow) -> Result<(), JournalError> {
        let mut line = serde_json::to_vec(row)?;
        line.push(b'\n');

        let _guard = self.lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

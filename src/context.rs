//! Market context for the oracle prompt, refreshed in the background.
//!
//! Also watches the futures/spot basis and raises a notification when it
//! crosses the configured spread threshold.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::notifier::Notifier;
use crate::supervisor::Shutdown;

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    #[error("bad number in {field}: {value:?}")]
    BadNumber { field: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarketContext {
    pub open_interest: Decimal,
    pub quote_volume_24h: Decimal,
    pub last_price: Decimal,
    pub spot_price: Decimal,
    pub fetched_at_ms: i64,
}

impl MarketContext {
    /// Futures premium over spot, in percent.
    pub fn basis_pct(&self) -> Decimal {
        if self.spot_price.is_zero() {
            return Decimal::ZERO;
        }
        (self.last_price - self.spot_price) / self.spot_price * Decimal::ONE_HUNDRED
    }
}

/// Latest context snapshot; empty until the first successful refresh.
#[derive(Clone, Default)]
pub struct ContextCache {
    inner: Arc<RwLock<Option<MarketContext>>>,
}

impl ContextCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self) -> Option<MarketContext> {
        self.inner.read().await.clone()
    }

    pub async fn set(&self, ctx: MarketContext) {
        *self.inner.write().await = Some(ctx);
    }
}

#[async_trait]
pub trait ContextSource: Send + Sync {
    async fn fetch(&self, symbol: &str) -> Result<MarketContext, ContextError>;
}

// ============================================================================
// Binance REST
// ============================================================================

#[derive(Debug, Deserialize)]
struct OpenInterestResponse {
    #[serde(rename = "openInterest")]
    open_interest: String,
}

#[derive(Debug, Deserialize)]
struct Ticker24hResponse {
    #[serde(rename = "lastPrice")]
    last_price: String,
    #[serde(rename = "quoteVolume")]
    quote_volume: String,
}

#[derive(Debug, Deserialize)]
struct PriceResponse {
    price: String,
}

fn parse_number(field: &'static str, value: &str) -> Result<Decimal, ContextError> {
    value
        .parse()
        .map_err(|_| ContextError::BadNumber { field, value: value.to_string() })
}

/// Public (unsigned) Binance endpoints.
pub struct BinanceContextSource {
    client: Client,
    futures_base: String,
    spot_base: String,
}

impl BinanceContextSource {
    pub fn new(futures_base: impl Into<String>, spot_base: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self { client, futures_base: futures_base.into(), spot_base: spot_base.into() }
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T, ContextError> {
        Ok(self.client.get(url).send().await?.error_for_status()?.json::<T>().await?)
    }
}

#[async_trait]
impl ContextSource for BinanceContextSource {
    async fn fetch(&self, symbol: &str) -> Result<MarketContext, ContextError> {
        let oi_url = format!("{}/fapi/v1/openInterest?symbol={}", self.futures_base, symbol);
        let ticker_url = format!("{}/fapi/v1/ticker/24hr?symbol={}", self.futures_base, symbol);
        let spot_url = format!("{}/api/v3/ticker/price?symbol={}", self.spot_base, symbol);

        let (oi, ticker, spot) = tokio::try_join!(
            self.get_json::<OpenInterestResponse>(&oi_url),
            self.get_json::<Ticker24hResponse>(&ticker_url),
            self.get_json::<PriceResponse>(&spot_url),
        )?;

        Ok(MarketContext {
            open_interest: parse_number("openInterest", &oi.open_interest)?,
            quote_volume_24h: parse_number("quoteVolume", &ticker.quote_volume)?,
            last_price: parse_number("lastPrice", &ticker.last_price)?,
            spot_price: parse_number("price", &spot.price)?,
            fetched_at_ms: Utc::now().timestamp_millis(),
        })
    }
}

// ============================================================================
// Refresher
// ============================================================================

/// Edge-triggered spread alarm: fires when the basis rises to the threshold,
/// re-arms once it falls back below.
#[derive(Debug)]
pub struct SpreadWatch {
    threshold_pct: Decimal,
    above: bool,
}

impl SpreadWatch {
    pub fn new(threshold_pct: Decimal) -> Self {
        Self { threshold_pct, above: false }
    }

    pub fn observe(&mut self, basis_pct: Decimal) -> bool {
        let now_above = basis_pct >= self.threshold_pct;
        let fire = now_above && !self.above;
        self.above = now_above;
        fire
    }
}

/// One refresh cycle. Returns the basis alert message when one is due.
pub async fn refresh_once(
    source: &dyn ContextSource,
    cache: &ContextCache,
    watch: &mut SpreadWatch,
    symbol: &str,
) -> Result<Option<String>, ContextError> {
    let ctx = source.fetch(symbol).await?;
    let basis = ctx.basis_pct();
    debug!(
        symbol,
        open_interest = %ctx.open_interest,
        quote_volume_24h = %ctx.quote_volume_24h,
        basis_pct = %basis.round_dp(4),
        "context refreshed"
    );

    let alert = watch.observe(basis).then(|| {
        format!(
            "📊 {} basis {}% | spot {} | futures {}",
            symbol,
            basis.round_dp(3),
            ctx.spot_price,
            ctx.last_price
        )
    });
    cache.set(ctx).await;
    Ok(alert)
}

pub async fn run_context_refresher(
    source: Arc<dyn ContextSource>,
    cache: ContextCache,
    notifier: Arc<dyn Notifier>,
    symbol: String,
    every: Duration,
    spread_alert_pct: Decimal,
    mut shutdown: Shutdown,
) -> anyhow::Result<()> {
    let mut watch = SpreadWatch::new(spread_alert_pct);
    let mut ticker = tokio::time::interval(every);
    let mut failures: u32 = 0;

    loop {
        tokio::select! {
            _ = shutdown.changed() => return Ok(()),
            _ = ticker.tick() => {}
        }

        match refresh_once(source.as_ref(), &cache, &mut watch, &symbol).await {
            Ok(alert) => {
                failures = 0;
                if let Some(msg) = alert {
                    notifier.send(&msg).await;
                }
            }
            Err(e) => {
                failures += 1;
                warn!(error = %e, failures, "context refresh failed");
                if failures == 3 {
                    notifier
                        .notify_degraded(&format!("Market context refresh failing for {}: {}", symbol, e))
                        .await;
                }
            }
        }
    }
}

//! Binance futures aggTrade stream.
//!
//! One connection per symbol. Frames are decoded and pushed through the
//! [`Pipeline`] inline; a local interval closes windows when the market is
//! quiet. Candidates are handed to the forwarder with `try_send` so a slow
//! oracle never stalls the read loop.

use futures::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::notifier::Notifier;
use crate::pipeline::{Pipeline, PipelineOutput};
use crate::supervisor::Shutdown;
use crate::types::{Candidate, TradeEvent, now_ms};

const TIMER_EVERY: Duration = Duration::from_secs(1);
const STATUS_EVERY: Duration = Duration::from_secs(60);
/// Consecutive undecodable frames before the connection is treated as broken.
const MALFORMED_FRAME_LIMIT: u32 = 20;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("malformed frame: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("bad {field} value {value:?}")]
    BadNumber { field: &'static str, value: String },

    #[error("websocket: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),
}

#[derive(Debug, Deserialize)]
struct BinanceAggTrade {
    #[serde(rename = "p")]
    price: String,
    #[serde(rename = "q")]
    quantity: String,
    #[serde(rename = "m")]
    is_buyer_maker: bool,
    #[serde(rename = "T")]
    trade_time: i64,
    #[serde(rename = "E", default)]
    event_time: Option<i64>,
}

fn parse_decimal(field: &'static str, value: &str) -> Result<Decimal, FeedError> {
    value
        .parse()
        .map_err(|_| FeedError::BadNumber { field, value: value.to_string() })
}

/// Decode one aggTrade frame. A buyer-maker trade was a sell by the aggressor.
pub fn decode_agg_trade(text: &str) -> Result<TradeEvent, FeedError> {
    let raw: BinanceAggTrade = serde_json::from_str(text)?;
    Ok(TradeEvent {
        price: parse_decimal("price", &raw.price)?,
        quantity: parse_decimal("quantity", &raw.quantity)?,
        is_sell: raw.is_buyer_maker,
        timestamp_ms: raw.event_time.unwrap_or(raw.trade_time),
    })
}

#[derive(Debug, Default)]
struct FeedCounters {
    malformed: u64,
    consecutive_malformed: u32,
    dropped: u64,
    reconnects: u64,
}

/// Exchange time as seen on the wire, advanced by local elapsed time between
/// trades. Window boundaries are decided on one timeline whether a trade or
/// the quiet-market timer closes them.
#[derive(Debug, Default)]
struct ExchangeClock {
    last: Option<(i64, Instant)>,
}

impl ExchangeClock {
    fn observe(&mut self, timestamp_ms: i64) {
        if self.last.is_none_or(|_| timestamp_ms >= self.now_ms()) {
            self.last = Some((timestamp_ms, Instant::now()));
        }
    }

    /// Local wall clock until the first trade arrives.
    fn now_ms(&self) -> i64 {
        match self.last {
            Some((ts, seen)) => ts + seen.elapsed().as_millis() as i64,
            None => now_ms(),
        }
    }
}

enum StreamEnd {
    Shutdown,
    Disconnected(&'static str),
}

/// Everything the read loop needs besides the socket.
struct StreamCtx<'a> {
    pipeline: &'a mut Pipeline,
    candidates: &'a mpsc::Sender<Candidate>,
    notifier: &'a Arc<dyn Notifier>,
    counters: &'a mut FeedCounters,
    clock: &'a mut ExchangeClock,
}

impl StreamCtx<'_> {
    fn dispatch(&mut self, output: PipelineOutput) {
        if let Some(alert) = output.alert {
            let notifier = self.notifier.clone();
            let symbol = self.pipeline.symbol().to_string();
            tokio::spawn(async move { notifier.notify_cluster(&symbol, &alert).await });
        }

        let Some(candidate) = output.candidate else {
            return;
        };
        match self.candidates.try_send(candidate) {
            Ok(()) => {}
            Err(TrySendError::Full(c)) => {
                self.counters.dropped += 1;
                warn!(signal = %c.signal, dropped = self.counters.dropped, "candidate queue full, dropping");
            }
            Err(TrySendError::Closed(c)) => {
                self.counters.dropped += 1;
                warn!(signal = %c.signal, "forwarder gone, dropping candidate");
            }
        }
    }

    fn on_frame(&mut self, text: &str) -> Result<(), FeedError> {
        let trade = decode_agg_trade(text)?;
        self.counters.consecutive_malformed = 0;
        self.clock.observe(trade.timestamp_ms);
        let output = self.pipeline.on_trade(trade);
        self.dispatch(output);
        Ok(())
    }

    fn log_status(&self) {
        let stats = self.pipeline.stats();
        info!(
            symbol = %self.pipeline.symbol(),
            trades = stats.trades,
            ticks = stats.ticks,
            candidates = stats.candidates,
            last_signal = %stats.last_signal,
            malformed = self.counters.malformed,
            dropped = self.counters.dropped,
            reconnects = self.counters.reconnects,
            "📈 stream status"
        );
    }
}

/// Run the stream until shutdown, reconnecting with backoff. Only returns an
/// error for conditions a restart could fix.
pub async fn run_trade_stream(
    url: String,
    mut pipeline: Pipeline,
    candidates: mpsc::Sender<Candidate>,
    notifier: Arc<dyn Notifier>,
    mut shutdown: Shutdown,
) -> anyhow::Result<()> {
    let mut backoff = Backoff::default();
    let mut counters = FeedCounters::default();
    let mut clock = ExchangeClock::default();

    loop {
        if *shutdown.borrow() {
            return Ok(());
        }

        info!(url = %url, "🔌 connecting to trade stream");
        let connected = tokio::select! {
            res = connect_async(url.as_str()) => res,
            _ = shutdown.changed() => return Ok(()),
        };

        let reason = match connected {
            Ok((ws, _)) => {
                info!(symbol = %pipeline.symbol(), "✅ trade stream connected");
                backoff.reset();
                let mut ctx = StreamCtx {
                    pipeline: &mut pipeline,
                    candidates: &candidates,
                    notifier: &notifier,
                    counters: &mut counters,
                    clock: &mut clock,
                };
                match pump(ws, &mut ctx, &mut shutdown).await {
                    Ok(StreamEnd::Shutdown) => return Ok(()),
                    Ok(StreamEnd::Disconnected(why)) => why.to_string(),
                    Err(e) => e.to_string(),
                }
            }
            Err(e) => format!("connect failed: {}", e),
        };

        counters.reconnects += 1;
        let delay = backoff.next_delay();
        warn!(reason = %reason, delay_ms = delay.as_millis() as u64, "trade stream down");
        notifier
            .notify_degraded(&format!(
                "{} trade stream down ({}), reconnecting in {}s",
                pipeline.symbol(),
                reason,
                delay.as_secs()
            ))
            .await;

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => return Ok(()),
        }
    }
}

async fn pump<S>(
    ws: tokio_tungstenite::WebSocketStream<S>,
    ctx: &mut StreamCtx<'_>,
    shutdown: &mut Shutdown,
) -> Result<StreamEnd, FeedError>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut write, mut read) = ws.split();

    let mut timer = tokio::time::interval(TIMER_EVERY);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut status = tokio::time::interval(STATUS_EVERY);
    status.set_missed_tick_behavior(MissedTickBehavior::Skip);
    status.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                let _ = write.send(Message::Close(None)).await;
                return Ok(StreamEnd::Shutdown);
            }
            _ = timer.tick() => {
                let output = ctx.pipeline.on_timer(ctx.clock.now_ms());
                ctx.dispatch(output);
            }
            _ = status.tick() => ctx.log_status(),
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Err(e) = ctx.on_frame(&text) {
                        ctx.counters.malformed += 1;
                        ctx.counters.consecutive_malformed += 1;
                        debug!(error = %e, malformed = ctx.counters.malformed, "ignoring frame");
                        if ctx.counters.consecutive_malformed >= MALFORMED_FRAME_LIMIT {
                            let streak = ctx.counters.consecutive_malformed;
                            ctx.counters.consecutive_malformed = 0;
                            warn!(streak, last_error = %e, "too many malformed frames, dropping connection");
                            ctx.notifier
                                .notify_degraded(&format!(
                                    "{} trade stream: {} malformed frames in a row",
                                    ctx.pipeline.symbol(),
                                    streak
                                ))
                                .await;
                            let _ = write.send(Message::Close(None)).await;
                            return Ok(StreamEnd::Disconnected("malformed frames"));
                        }
                    }
                }
                Some(Ok(Message::Close(_))) => return Ok(StreamEnd::Disconnected("closed by server")),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(StreamEnd::Disconnected("stream ended")),
            },
        }
    }
}

/// Cluster Signal Bot
///
/// Watches Binance futures aggTrade flow for one symbol, buckets it by price,
/// classifies the strongest cluster each window and, after an oracle check and
/// the cooldown gate, opens a position.
///
/// Usage:
///   cargo run --release --bin cluster_bot -- --symbol ETHUSDT
///
/// Environment variables:
///   OPENAI_API_KEY - Oracle key (required unless ORACLE_DISABLED=true)
///   TELEGRAM_BOT_TOKEN / TELEGRAM_CHAT_ID - Notifications (optional)
///   MOCK_TRADING - Paper trading (default: true)
///   ORDER_USD - Position size per trade (default: 100)
///   MAX_HOLD_SECS - Close positions after this long (default: 900)
///   EXIT_BASIS_PCT - Close once |basis| falls to this percent (default: off)
use anyhow::{Result, bail};
use clap::Parser;
use dotenvy::dotenv;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tracing::info;

use cluster_signal_bot::arbitration::Arbiter;
use cluster_signal_bot::binance_feed::run_trade_stream;
use cluster_signal_bot::broker::{OrderPlacer, PaperBroker};
use cluster_signal_bot::context::{BinanceContextSource, ContextCache, ContextSource, run_context_refresher};
use cluster_signal_bot::exit_monitor::run_exit_monitor;
use cluster_signal_bot::forwarder::{DecisionForwarder, run_forwarder};
use cluster_signal_bot::journal::JsonlJournal;
use cluster_signal_bot::logging::init_tracing;
use cluster_signal_bot::notifier::{Notifier, TelegramNotifier};
use cluster_signal_bot::oracle::{DecisionOracle, OpenAiOracle, PassthroughOracle};
use cluster_signal_bot::pipeline::Pipeline;
use cluster_signal_bot::supervisor::Supervisor;
use cluster_signal_bot::types::now_ms;
use cluster_signal_bot::Config;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Parser)]
#[command(name = "cluster_bot", about = "Order-flow cluster signal bot")]
struct Args {
    /// Futures symbol to watch, e.g. BTCUSDT.
    #[arg(long, env = "SYMBOL")]
    symbol: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long, env = "JSON_LOGS", default_value_t = false)]
    json_logs: bool,

    /// Force paper trading regardless of MOCK_TRADING.
    #[arg(long)]
    paper: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let args = Args::parse();
    init_tracing(args.json_logs);

    let mut cfg = Config::from_env()?;
    if let Some(symbol) = args.symbol {
        cfg.symbol = symbol.to_uppercase();
    }
    if args.paper {
        cfg.mock_trading = true;
    }
    if !cfg.mock_trading {
        bail!("MOCK_TRADING=false needs a live exchange broker, which this build does not ship");
    }
    let cfg = Arc::new(cfg);

    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║        📊 CLUSTER SIGNAL BOT                               ║");
    println!("╚════════════════════════════════════════════════════════════╝");
    info!(
        symbol = %cfg.symbol,
        mode = cfg.mode_label(),
        oracle = cfg.oracle_enabled(),
        bucket_size = %cfg.aggregation.bucket_size,
        interval_secs = cfg.aggregation.interval.as_secs(),
        cooldown_secs = cfg.arbitration.cooldown.as_secs(),
        "starting"
    );

    let notifier: Arc<dyn Notifier> =
        Arc::new(TelegramNotifier::new(cfg.telegram_bot_token.clone(), cfg.telegram_chat_id.clone()));
    let oracle: Arc<dyn DecisionOracle> = match &cfg.openai_api_key {
        Some(key) => Arc::new(OpenAiOracle::new(cfg.openai_url.clone(), key.clone(), cfg.openai_model.clone())),
        None => {
            info!("oracle disabled, passing classifier signals through");
            Arc::new(PassthroughOracle)
        }
    };

    let arbiter = Arbiter::shared(&cfg.arbitration);
    let context = ContextCache::new();
    let broker: Arc<dyn OrderPlacer> = Arc::new(PaperBroker::new());
    let forwarder = Arc::new(DecisionForwarder::new(
        oracle,
        broker.clone(),
        notifier.clone(),
        Arc::new(JsonlJournal::new(cfg.journal_path.clone())),
        arbiter.clone(),
        context.clone(),
        cfg.order_usd,
        cfg.mock_trading,
    ));

    let (candidates_tx, candidates_rx) = mpsc::channel(cfg.candidate_queue);
    let candidates_rx = Arc::new(Mutex::new(candidates_rx));

    let mut supervisor = Supervisor::new();

    {
        let cfg = cfg.clone();
        let notifier = notifier.clone();
        supervisor.spawn("trade_stream", move |shutdown| {
            let pipeline = Pipeline::new(
                cfg.symbol.clone(),
                &cfg.aggregation,
                cfg.thresholds.clone(),
                arbiter.clone(),
                now_ms(),
            );
            run_trade_stream(cfg.trade_stream_url(), pipeline, candidates_tx.clone(), notifier.clone(), shutdown)
        });
    }

    supervisor.spawn("forwarder", move |shutdown| {
        let forwarder = forwarder.clone();
        let rx = candidates_rx.clone();
        async move {
            let mut rx = rx.lock().await;
            run_forwarder(&mut rx, &forwarder, shutdown).await
        }
    });

    {
        let cfg = cfg.clone();
        let notifier = notifier.clone();
        let context = context.clone();
        supervisor.spawn("exit_monitor", move |shutdown| {
            run_exit_monitor(broker.clone(), context.clone(), notifier.clone(), cfg.exit.clone(), shutdown)
        });
    }

    {
        let cfg = cfg.clone();
        let notifier = notifier.clone();
        let source: Arc<dyn ContextSource> =
            Arc::new(BinanceContextSource::new(cfg.futures_rest_base.clone(), cfg.spot_rest_base.clone()));
        supervisor.spawn("context_refresher", move |shutdown| {
            run_context_refresher(
                source.clone(),
                context.clone(),
                notifier.clone(),
                cfg.symbol.clone(),
                cfg.context_refresh,
                cfg.spread_alert_pct,
                shutdown,
            )
        });
    }

    notifier.notify_startup(&cfg.symbol, cfg.mode_label()).await;

    tokio::signal::ctrl_c().await?;
    info!("ctrl-c received, shutting down");
    supervisor.shutdown(SHUTDOWN_GRACE).await;
    notifier.notify_shutdown(&cfg.symbol).await;
    Ok(())
}

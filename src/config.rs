//! Runtime configuration.
//!
//! Everything is read from the environment (after `.env` is loaded by the
//! binary). Missing optional values fall back to the named defaults below;
//! a value that is present but unparsable is a startup error.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Defaults
// ============================================================================

pub const DEFAULT_SYMBOL: &str = "BTCUSDT";

/// Binance USD-M futures websocket base (stream name is appended).
pub const BINANCE_FUTURES_WS_BASE: &str = "wss://fstream.binance.com/ws";
pub const BINANCE_FUTURES_REST_BASE: &str = "https://fapi.binance.com";
pub const BINANCE_SPOT_REST_BASE: &str = "https://api.binance.com";

pub const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

/// Price bucket width, quote currency.
pub const DEFAULT_BUCKET_SIZE: Decimal = dec!(10);
pub const DEFAULT_AGGREGATION_INTERVAL_SECS: u64 = 60;
/// Trailing window of raw trades used for the buy/sell ratio.
pub const DEFAULT_RATIO_WINDOW_SECS: u64 = 30;

/// Buy (or sell) share in percent required for a super-boosted signal.
pub const DEFAULT_SUPER_BOOST_RATIO: Decimal = dec!(80);
/// Side volume required for a super-boosted signal.
pub const DEFAULT_SUPER_BOOST_VOLUME: Decimal = dec!(150);
/// Side volume required for a boosted signal.
pub const DEFAULT_BOOST_THRESHOLD: Decimal = dec!(65);
/// Lower boost bar applied once a cluster has been reported.
pub const DEFAULT_ALT_BOOST_THRESHOLD: Decimal = dec!(50);
/// Cluster volume above which a bucket is reported as informational.
pub const DEFAULT_MIN_CLUSTER_ALERT: Decimal = dec!(40);
/// Ratio in percent for a plain LONG/SHORT on a reported cluster.
pub const DEFAULT_DIRECTIONAL_RATIO: Decimal = dec!(60);

pub const DEFAULT_IMPULSE_VOLUME_MIN: Decimal = dec!(65);
pub const DEFAULT_RECENT_IMPULSE_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_COOLDOWN_SECS: u64 = 300;

/// Paper positions are closed after this long regardless of the market.
pub const DEFAULT_MAX_HOLD_SECS: u64 = 900;
pub const DEFAULT_EXIT_CHECK_SECS: u64 = 5;

pub const DEFAULT_ORDER_USD: Decimal = dec!(100);
pub const DEFAULT_SPREAD_ALERT_PCT: Decimal = dec!(0.3);
pub const DEFAULT_CONTEXT_REFRESH_SECS: u64 = 30;
pub const DEFAULT_CANDIDATE_QUEUE: usize = 64;
pub const DEFAULT_JOURNAL_PATH: &str = "trade_journal.jsonl";

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} env var required")]
    Missing(&'static str),

    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },

    #[error("{0}")]
    Inconsistent(String),
}

// ============================================================================
// Threshold tables
// ============================================================================

/// Classifier thresholds. Volumes are base-asset units, ratios are percent.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalThresholds {
    pub super_boost_ratio: Decimal,
    pub super_boost_volume: Decimal,
    pub boost_threshold: Decimal,
    pub alt_boost_threshold: Decimal,
    pub min_cluster_alert: Decimal,
    pub directional_ratio: Decimal,
}

impl Default for SignalThresholds {
    fn default() -> Self {
        Self {
            super_boost_ratio: DEFAULT_SUPER_BOOST_RATIO,
            super_boost_volume: DEFAULT_SUPER_BOOST_VOLUME,
            boost_threshold: DEFAULT_BOOST_THRESHOLD,
            alt_boost_threshold: DEFAULT_ALT_BOOST_THRESHOLD,
            min_cluster_alert: DEFAULT_MIN_CLUSTER_ALERT,
            directional_ratio: DEFAULT_DIRECTIONAL_RATIO,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregationConfig {
    pub bucket_size: Decimal,
    pub interval: Duration,
    pub ratio_window: Duration,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            bucket_size: DEFAULT_BUCKET_SIZE,
            interval: Duration::from_secs(DEFAULT_AGGREGATION_INTERVAL_SECS),
            ratio_window: Duration::from_secs(DEFAULT_RATIO_WINDOW_SECS),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArbitrationConfig {
    pub impulse_volume_min: Decimal,
    pub recent_impulse_timeout: Duration,
    pub cooldown: Duration,
}

impl Default for ArbitrationConfig {
    fn default() -> Self {
        Self {
            impulse_volume_min: DEFAULT_IMPULSE_VOLUME_MIN,
            recent_impulse_timeout: Duration::from_secs(DEFAULT_RECENT_IMPULSE_TIMEOUT_SECS),
            cooldown: Duration::from_secs(DEFAULT_COOLDOWN_SECS),
        }
    }
}

/// When open positions are closed. `basis_exit_pct` is off unless set.
#[derive(Debug, Clone, PartialEq)]
pub struct ExitConfig {
    pub max_hold: Duration,
    pub basis_exit_pct: Option<Decimal>,
    pub check_every: Duration,
}

impl Default for ExitConfig {
    fn default() -> Self {
        Self {
            max_hold: Duration::from_secs(DEFAULT_MAX_HOLD_SECS),
            basis_exit_pct: None,
            check_every: Duration::from_secs(DEFAULT_EXIT_CHECK_SECS),
        }
    }
}

// ============================================================================
// Config
// ============================================================================

#[derive(Debug, Clone)]
pub struct Config {
    pub symbol: String,
    pub ws_base: String,
    pub futures_rest_base: String,
    pub spot_rest_base: String,

    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_url: String,

    pub telegram_bot_token: String,
    pub telegram_chat_id: String,

    pub mock_trading: bool,
    pub order_usd: Decimal,
    pub journal_path: String,

    pub aggregation: AggregationConfig,
    pub thresholds: SignalThresholds,
    pub arbitration: ArbitrationConfig,
    pub exit: ExitConfig,

    pub spread_alert_pct: Decimal,
    pub context_refresh: Duration,
    pub candidate_queue: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let oracle_disabled = parse_bool(&get, "ORACLE_DISABLED", false)?;
        let openai_api_key = get("OPENAI_API_KEY");
        if openai_api_key.is_none() && !oracle_disabled {
            return Err(ConfigError::Missing("OPENAI_API_KEY"));
        }

        let thresholds = SignalThresholds {
            super_boost_ratio: parse_or(&get, "SUPER_BOOST_RATIO", DEFAULT_SUPER_BOOST_RATIO)?,
            super_boost_volume: parse_or(&get, "SUPER_BOOST_VOLUME", DEFAULT_SUPER_BOOST_VOLUME)?,
            boost_threshold: parse_or(&get, "BOOST_THRESHOLD", DEFAULT_BOOST_THRESHOLD)?,
            alt_boost_threshold: parse_or(&get, "ALT_BOOST_THRESHOLD", DEFAULT_ALT_BOOST_THRESHOLD)?,
            min_cluster_alert: parse_or(&get, "MIN_CLUSTER_ALERT", DEFAULT_MIN_CLUSTER_ALERT)?,
            directional_ratio: parse_or(&get, "DIRECTIONAL_RATIO", DEFAULT_DIRECTIONAL_RATIO)?,
        };

        let aggregation = AggregationConfig {
            bucket_size: parse_or(&get, "BUCKET_SIZE", DEFAULT_BUCKET_SIZE)?,
            interval: Duration::from_secs(parse_or(
                &get,
                "AGGREGATION_INTERVAL_SECS",
                DEFAULT_AGGREGATION_INTERVAL_SECS,
            )?),
            ratio_window: Duration::from_secs(parse_or(
                &get,
                "RATIO_WINDOW_SECS",
                DEFAULT_RATIO_WINDOW_SECS,
            )?),
        };

        let arbitration = ArbitrationConfig {
            impulse_volume_min: parse_or(&get, "IMPULSE_VOLUME_MIN", DEFAULT_IMPULSE_VOLUME_MIN)?,
            recent_impulse_timeout: Duration::from_secs(parse_or(
                &get,
                "RECENT_IMPULSE_TIMEOUT_SECS",
                DEFAULT_RECENT_IMPULSE_TIMEOUT_SECS,
            )?),
            cooldown: Duration::from_secs(parse_or(&get, "COOLDOWN_SECS", DEFAULT_COOLDOWN_SECS)?),
        };

        let exit = ExitConfig {
            max_hold: Duration::from_secs(parse_or(&get, "MAX_HOLD_SECS", DEFAULT_MAX_HOLD_SECS)?),
            basis_exit_pct: parse_opt(&get, "EXIT_BASIS_PCT")?,
            check_every: Duration::from_secs(parse_or(&get, "EXIT_CHECK_SECS", DEFAULT_EXIT_CHECK_SECS)?),
        };

        let cfg = Self {
            symbol: get("SYMBOL").unwrap_or_else(|| DEFAULT_SYMBOL.to_string()).to_uppercase(),
            ws_base: get("BINANCE_WS_BASE").unwrap_or_else(|| BINANCE_FUTURES_WS_BASE.to_string()),
            futures_rest_base: get("BINANCE_FUTURES_REST_BASE")
                .unwrap_or_else(|| BINANCE_FUTURES_REST_BASE.to_string()),
            spot_rest_base: get("BINANCE_SPOT_REST_BASE")
                .unwrap_or_else(|| BINANCE_SPOT_REST_BASE.to_string()),
            openai_api_key: if oracle_disabled { None } else { openai_api_key },
            openai_model: get("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
            openai_url: get("OPENAI_URL").unwrap_or_else(|| OPENAI_CHAT_URL.to_string()),
            telegram_bot_token: get("TELEGRAM_BOT_TOKEN").unwrap_or_default(),
            telegram_chat_id: get("TELEGRAM_CHAT_ID").unwrap_or_default(),
            // Paper trading unless explicitly turned off
            mock_trading: parse_bool(&get, "MOCK_TRADING", true)?,
            order_usd: parse_or(&get, "ORDER_USD", DEFAULT_ORDER_USD)?,
            journal_path: get("JOURNAL_PATH").unwrap_or_else(|| DEFAULT_JOURNAL_PATH.to_string()),
            aggregation,
            thresholds,
            arbitration,
            exit,
            spread_alert_pct: parse_or(&get, "SPREAD_ALERT_PCT", DEFAULT_SPREAD_ALERT_PCT)?,
            context_refresh: Duration::from_secs(parse_or(
                &get,
                "CONTEXT_REFRESH_SECS",
                DEFAULT_CONTEXT_REFRESH_SECS,
            )?),
            candidate_queue: parse_or(&get, "CANDIDATE_QUEUE", DEFAULT_CANDIDATE_QUEUE)?,
        };

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.aggregation.bucket_size <= Decimal::ZERO {
            return Err(ConfigError::Inconsistent("BUCKET_SIZE must be positive".into()));
        }
        if self.aggregation.interval.is_zero() {
            return Err(ConfigError::Inconsistent(
                "AGGREGATION_INTERVAL_SECS must be positive".into(),
            ));
        }
        if self.thresholds.alt_boost_threshold > self.thresholds.boost_threshold {
            return Err(ConfigError::Inconsistent(
                "ALT_BOOST_THRESHOLD must not exceed BOOST_THRESHOLD".into(),
            ));
        }
        if self.candidate_queue == 0 {
            return Err(ConfigError::Inconsistent("CANDIDATE_QUEUE must be positive".into()));
        }
        if self.exit.max_hold.is_zero() || self.exit.check_every.is_zero() {
            return Err(ConfigError::Inconsistent(
                "MAX_HOLD_SECS and EXIT_CHECK_SECS must be positive".into(),
            ));
        }
        if self.exit.basis_exit_pct.is_some_and(|pct| pct < Decimal::ZERO) {
            return Err(ConfigError::Inconsistent("EXIT_BASIS_PCT must not be negative".into()));
        }
        if self.order_usd <= Decimal::ZERO {
            return Err(ConfigError::Inconsistent("ORDER_USD must be positive".into()));
        }
        Ok(())
    }

    pub fn oracle_enabled(&self) -> bool {
        self.openai_api_key.is_some()
    }

    pub fn trade_stream_url(&self) -> String {
        format!("{}/{}@aggTrade", self.ws_base.trim_end_matches('/'), self.symbol.to_lowercase())
    }

    pub fn mode_label(&self) -> &'static str {
        if self.mock_trading { "MOCK (paper trading)" } else { "LIVE" }
    }
}

fn parse_or<G, T>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    G: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match get(key) {
        Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid { key, value: raw }),
        None => Ok(default),
    }
}

fn parse_opt<G, T>(get: &G, key: &'static str) -> Result<Option<T>, ConfigError>
where
    G: Fn(&str) -> Option<String>,
    T: FromStr,
{
    get(key)
        .map(|raw| raw.parse().map_err(|_| ConfigError::Invalid { key, value: raw }))
        .transpose()
}

fn parse_bool<G>(get: &G, key: &'static str, default: bool) -> Result<bool, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid { key, value: raw }),
        },
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_apply_when_only_key_is_set() {
        let cfg = Config::from_lookup(lookup(&[("OPENAI_API_KEY", "sk-test")])).unwrap();
        assert_eq!(cfg.symbol, "BTCUSDT");
        assert!(cfg.mock_trading);
        assert_eq!(cfg.thresholds, SignalThresholds::default());
        assert_eq!(cfg.arbitration.cooldown, Duration::from_secs(DEFAULT_COOLDOWN_SECS));
        assert_eq!(cfg.trade_stream_url(), "wss://fstream.binance.com/ws/btcusdt@aggTrade");
        assert_eq!(cfg.exit, ExitConfig::default());
        assert!(cfg.oracle_enabled());
    }

    #[test]
    fn missing_api_key_is_fatal_unless_oracle_disabled() {
        let err = Config::from_lookup(lookup(&[])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("OPENAI_API_KEY"));

        let cfg = Config::from_lookup(lookup(&[("ORACLE_DISABLED", "true")])).unwrap();
        assert!(!cfg.oracle_enabled());
    }

    #[test]
    fn overrides_are_parsed() {
        let cfg = Config::from_lookup(lookup(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("SYMBOL", "ethusdt"),
            ("BOOST_THRESHOLD", "120.5"),
            ("COOLDOWN_SECS", "30"),
            ("MOCK_TRADING", "false"),
        ]))
        .unwrap();
        assert_eq!(cfg.symbol, "ETHUSDT");
        assert_eq!(cfg.thresholds.boost_threshold, dec!(120.5));
        assert_eq!(cfg.arbitration.cooldown, Duration::from_secs(30));
        assert!(!cfg.mock_trading);
    }

    #[test]
    fn garbage_values_are_rejected() {
        let err = Config::from_lookup(lookup(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("BUCKET_SIZE", "ten"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "BUCKET_SIZE", .. }));

        let err = Config::from_lookup(lookup(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("ALT_BOOST_THRESHOLD", "90"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Inconsistent(_)));
    }

    #[test]
    fn exit_settings() {
        let cfg = Config::from_lookup(lookup(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("MAX_HOLD_SECS", "600"),
            ("EXIT_BASIS_PCT", "0.1"),
        ]))
        .unwrap();
        assert_eq!(cfg.exit.max_hold, Duration::from_secs(600));
        assert_eq!(cfg.exit.basis_exit_pct, Some(dec!(0.1)));

        let err = Config::from_lookup(lookup(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("EXIT_BASIS_PCT", "-1"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Inconsistent(_)));
    }
}

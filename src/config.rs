// ===============================
// src/config.rs
// ===============================
/*
=============================================================================
Project : poll_trader — polling order-lifecycle trading bot in Rust
Module  : config.rs
Version : 0.5.0
Author  : Kukuh Tripamungkas Wicaksono (Kukuh TW)
Email   : kukuhtw@gmail.com
WhatsApp: https://wa.me/628129893706
LinkedIn: https://id.linkedin.com/in/kukuhtw
License : MIT (see LICENSE)

Summary : Runs a pluggable bar strategy against one instrument, places
          limit orders through a polling gateway (mock/Binance), reconciles
          unfilled / partial / cancel-failed orders on a timer, tracks the
          weighted entry price, enforces stop-loss, exposes Prometheus
          metrics and records JSONL events.

(c) 2025 Kukuh TW. All rights reserved where applicable.
=============================================================================
*/
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use dotenvy::dotenv;
use tracing::warn;

use crate::retry::RetryPolicy;

/// Mode sumber market data / venue trading
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MarketMode {
    Mock,
    BinanceSandbox,
    BinanceMainnet,
}

impl MarketMode {
    pub fn parse(s: &str) -> Option<MarketMode> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mock"             => Some(MarketMode::Mock),
            "binance_sandbox"  => Some(MarketMode::BinanceSandbox),
            "binance_mainnet"  => Some(MarketMode::BinanceMainnet),
            _ => None,
        }
    }

    pub fn from_env(key: &str, default_mode: MarketMode) -> MarketMode {
        Self::parse(&env::var(key).unwrap_or_default()).unwrap_or(default_mode)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MarketMode::Mock            => "mock",
            MarketMode::BinanceSandbox  => "binance_sandbox",
            MarketMode::BinanceMainnet  => "binance_mainnet",
        }
    }

    // Endpoint default per mode
    pub fn default_ws_url(&self) -> &'static str {
        match self {
            MarketMode::Mock            => "wss://testnet.binance.vision/ws", // tidak dipakai saat mock
            MarketMode::BinanceSandbox  => "wss://testnet.binance.vision/ws",
            MarketMode::BinanceMainnet  => "wss://stream.binance.com:9443/ws",
        }
    }

    pub fn default_rest_url(&self) -> &'static str {
        match self {
            MarketMode::Mock            => "https://testnet.binance.vision", // placeholder
            MarketMode::BinanceSandbox  => "https://testnet.binance.vision",
            MarketMode::BinanceMainnet  => "https://api.binance.com",
        }
    }
}

/// Instrument traded, e.g. `btc_cny` -> base `btc`, quote `cny`.
#[derive(Clone, Debug, PartialEq)]
pub struct Instrument {
    pub symbol: String,
    pub base: String,
    pub quote: String,
}

impl Instrument {
    pub fn parse(symbol: &str) -> Self {
        let symbol = symbol.trim().to_ascii_lowercase();
        let (base, quote) = match symbol.split_once('_') {
            Some((b, q)) => (b.to_string(), q.to_string()),
            None => (symbol.clone(), String::new()),
        };
        Self { symbol, base, quote }
    }

    /// Smallest buy lot accepted by the venue for this instrument.
    pub fn min_lot(&self) -> f64 {
        if self.symbol == "btc_cny" { 0.1 } else { 0.01 }
    }

    /// Venue symbol for Binance (`btc_usdt` -> `BTCUSDT`).
    pub fn venue_symbol(&self) -> String {
        format!("{}{}", self.base, self.quote).to_ascii_uppercase()
    }
}

/// Trading options consumed by the placement, reconciliation and stop-loss code.
#[derive(Clone, Debug)]
pub struct Settings {
    pub strategy: String,
    pub instrument: Instrument,
    pub slippage: f64,
    pub trade_amount: f64,
    pub enable_trading: bool,
    /// `None` when unset or unparseable: stop-loss never fires.
    pub stoploss_pct: Option<f64>,
    pub disciple_mode: bool,
    pub disciple_value: f64,
    pub buy_timeout: Duration,
    pub sell_inspect_delay: Duration,
    pub sell_timeout: Duration,
    pub reconcile_interval: Duration,
    pub gateway_pause: Duration,
    pub price_tick: f64,
    pub retry: RetryPolicy,
    pub kline_periods: usize,
    pub state_file: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            strategy: "ma_crossover".into(),
            instrument: Instrument::parse("btc_cny"),
            slippage: 0.01,
            trade_amount: 0.1,
            enable_trading: false,
            stoploss_pct: None,
            disciple_mode: false,
            disciple_value: 0.01,
            buy_timeout: Duration::from_secs(120),
            sell_inspect_delay: Duration::from_secs(2),
            sell_timeout: Duration::from_secs(120),
            reconcile_interval: Duration::from_secs(10),
            gateway_pause: Duration::from_millis(1000),
            price_tick: 0.01,
            retry: RetryPolicy::default(),
            kline_periods: 1,
            state_file: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Args {
    pub settings: Settings,

    // files/metrics
    pub record_file: Option<String>,
    pub metrics_port: u16,
    pub notify_webhook: Option<String>,

    // market mode
    pub feed_mode: MarketMode,
    pub venue_mode: MarketMode,
    pub binance_ws_url: String,
    pub binance_rest_url: String,
    pub binance_api_key: Option<String>,
    pub binance_api_secret: Option<String>,
    pub binance_recv_window: u64,
}

/// Parse a numeric option; on garbage log and fall back to `default`.
pub fn parse_or<T: FromStr + Copy + std::fmt::Debug>(key: &str, raw: Option<&str>, default: T) -> T {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => default,
        Some(s) => match s.parse::<T>() {
            Ok(v) => v,
            Err(_) => {
                warn!(key, value = s, ?default, "config item is not a number, using default");
                default
            }
        },
    }
}

fn env_num<T: FromStr + Copy + std::fmt::Debug>(key: &str, default: T) -> T {
    parse_or(key, env::var(key).ok().as_deref(), default)
}

fn env_flag(key: &str) -> bool {
    env::var(key).map(|v| v.trim() == "1").unwrap_or(false)
}

/// Stop-loss percent; misconfiguration disables the monitor instead of failing.
pub fn parse_stoploss(raw: Option<&str>) -> Option<f64> {
    let raw = raw.map(str::trim).filter(|s| !s.is_empty())?;
    match raw.trim_end_matches('%').parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 => Some(v),
        _ => {
            warn!(value = raw, "config item stoploss is not a valid percent, stop-loss disabled");
            None
        }
    }
}

fn settings_from_env() -> Settings {
    let d = Settings::default();

    let symbol = env::var("SYMBOL").unwrap_or_else(|_| d.instrument.symbol.clone());
    let mut instrument = Instrument::parse(&symbol);
    if let Ok(b) = env::var("BASE_ASSET") { instrument.base = b.to_ascii_lowercase(); }
    if let Ok(q) = env::var("QUOTE_ASSET") { instrument.quote = q.to_ascii_lowercase(); }

    let secs = |key: &str, dflt: Duration| Duration::from_secs(env_num(key, dflt.as_secs()));

    Settings {
        strategy: env::var("STRATEGY").unwrap_or(d.strategy),
        instrument,
        slippage: env_num("SLIPPAGE", d.slippage),
        trade_amount: env_num("TRADE_AMOUNT", d.trade_amount),
        enable_trading: env_flag("ENABLE_TRADING"),
        stoploss_pct: parse_stoploss(env::var("STOPLOSS").ok().as_deref()),
        disciple_mode: env_flag("DISCIPLE_MODE"),
        disciple_value: env_num("DISCIPLE_VALUE", d.disciple_value),
        buy_timeout: secs("BUY_TIMEOUT_SECS", d.buy_timeout),
        sell_inspect_delay: secs("SELL_INSPECT_SECS", d.sell_inspect_delay),
        sell_timeout: secs("SELL_TIMEOUT_SECS", d.sell_timeout),
        reconcile_interval: secs("RECONCILE_INTERVAL_SECS", d.reconcile_interval),
        gateway_pause: Duration::from_millis(env_num("GATEWAY_PAUSE_MS", d.gateway_pause.as_millis() as u64)),
        price_tick: env_num("PRICE_TICK", d.price_tick),
        retry: RetryPolicy {
            max_attempts: env_num("RETRY_MAX_ATTEMPTS", d.retry.max_attempts),
            base_ms: env_num("RETRY_BASE_MS", d.retry.base_ms),
            max_ms: env_num("RETRY_MAX_MS", d.retry.max_ms),
            jitter_ms: d.retry.jitter_ms,
        },
        kline_periods: env_num("KLINE_PERIODS", d.kline_periods).max(1),
        state_file: env::var("STATE_FILE").ok().filter(|s| !s.is_empty()).map(PathBuf::from),
    }
}

pub fn load() -> Args {
    // Pastikan .env dibaca (agar STRATEGY, SYMBOL, dll ter-load)
    let _ = dotenv();

    let settings = settings_from_env();

    let record_file  = env::var("RECORD_FILE").ok();
    let metrics_port = env_num("METRICS_PORT", 9898u16);
    let notify_webhook = env::var("NOTIFY_WEBHOOK_URL").ok().filter(|s| !s.is_empty());

    // ===== Mode =====
    let feed_mode  = MarketMode::from_env("FEED_MODE",  MarketMode::Mock);
    let venue_mode = MarketMode::from_env("VENUE_MODE", MarketMode::Mock);

    let binance_ws_url = env::var("BINANCE_WS_URL")
        .unwrap_or_else(|_| feed_mode.default_ws_url().to_string());
    let binance_rest_url = env::var("BINANCE_REST_URL")
        .unwrap_or_else(|_| venue_mode.default_rest_url().to_string());

    Args {
        settings,
        record_file,
        metrics_port,
        notify_webhook,
        feed_mode,
        venue_mode,
        binance_ws_url,
        binance_rest_url,
        binance_api_key: env::var("BINANCE_API_KEY").ok(),
        binance_api_secret: env::var("BINANCE_API_SECRET").ok(),
        binance_recv_window: env_num("BINANCE_RECV_WINDOW", 5000u64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instrument_from_symbol() {
        let i = Instrument::parse("BTC_CNY");
        assert_eq!(i.base, "btc");
        assert_eq!(i.quote, "cny");
        assert_eq!(i.min_lot(), 0.1);
        assert_eq!(Instrument::parse("ltc_cny").min_lot(), 0.01);
        assert_eq!(Instrument::parse("btc_usdt").venue_symbol(), "BTCUSDT");
    }

    #[test]
    fn bad_numbers_fall_back() {
        assert_eq!(parse_or("SLIPPAGE", Some("abc"), 0.01), 0.01);
        assert_eq!(parse_or("SLIPPAGE", Some(" 0.5 "), 0.01), 0.5);
        assert_eq!(parse_or("SLIPPAGE", None, 0.01), 0.01);
        assert_eq!(parse_or("GATEWAY_PAUSE_MS", Some("-3"), 1000u64), 1000);
    }

    #[test]
    fn stoploss_parsing() {
        assert_eq!(parse_stoploss(Some("5")), Some(5.0));
        assert_eq!(parse_stoploss(Some("2.5%")), Some(2.5));
        assert_eq!(parse_stoploss(Some("five")), None);
        assert_eq!(parse_stoploss(None), None);
    }

    #[test]
    fn market_mode_names() {
        assert_eq!(MarketMode::parse("BINANCE_SANDBOX"), Some(MarketMode::BinanceSandbox));
        assert_eq!(MarketMode::parse("x"), None);
        assert_eq!(MarketMode::Mock.as_str(), "mock");
    }
}

// ===============================
// src/metrics.rs
// ===============================
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Gauge, Opts, Registry, TextEncoder,
};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;

// Single custom registry (we register everything here)
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

// -------- Market data --------
pub static BARS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("bars_total", "price bars received").unwrap());

pub static BAD_TICKS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("bad_ticks_total", "bars rejected by the data-quality filter").unwrap());

pub static STRATEGY_TICKS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("strategy_ticks_total", "strategy invocations (labels: strategy, handled)"),
        &["strategy", "handled"],
    )
    .unwrap()
});

// -------- Orders --------
pub static ORDERS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("orders_total", "order placements (labels: side, result)"),
        &["side", "result"],
    )
    .unwrap()
});

pub static FILLS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("fills_total", "fills recognised by reconciliation (labels: side, kind)"),
        &["side", "kind"],
    )
    .unwrap()
});

pub static CANCELS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("cancels_total", "cancel attempts (labels: side, result)"),
        &["side", "result"],
    )
    .unwrap()
});

pub static RETRIES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("retries_total", "retry queue attempts (labels: kind, result)"),
        &["kind", "result"],
    )
    .unwrap()
});

pub static STOPLOSS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("stoploss_triggers_total", "stop-loss triggers").unwrap());

pub static PENDING: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("pending_orders", "pending orders / queue sizes (label: set)"),
        &["set"],
    )
    .unwrap()
});

// -------- Position --------
pub static POSITION_QTY: Lazy<Gauge> =
    Lazy::new(|| Gauge::new("position_qty", "accumulated filled quantity").unwrap());

pub static POSITION_AVG: Lazy<Gauge> =
    Lazy::new(|| Gauge::new("position_avg_price", "weighted average entry price").unwrap());

pub static NOTIFY_DROPPED: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("notify_dropped_total", "notifications dropped (queue full)").unwrap());

// ---- Config visibility (feed / venue / strategy / symbol) ----
pub static CONFIG_FEED_MODE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("config_feed_mode", "feed mode (label: mode)"),
        &["mode"],
    )
    .unwrap()
});

pub static CONFIG_VENUE_MODE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("config_venue_mode", "venue mode (label: mode)"),
        &["mode"],
    )
    .unwrap()
});

pub static CONFIG_STRATEGY_ACTIVE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("config_strategy_active", "active strategy (label: strategy)"),
        &["strategy"],
    )
    .unwrap()
});

pub static CONFIG_SYMBOL: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("config_symbol", "configured symbol (label: symbol)"),
        &["symbol"],
    )
    .unwrap()
});

pub static CONFIG_LIVE_TRADING: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("config_live_trading", "1 when ENABLE_TRADING=1").unwrap());

pub fn init() {
    // Register all metrics to the custom registry
    for m in [
        REGISTRY.register(Box::new(BARS.clone())),
        REGISTRY.register(Box::new(BAD_TICKS.clone())),
        REGISTRY.register(Box::new(STRATEGY_TICKS.clone())),
        REGISTRY.register(Box::new(ORDERS.clone())),
        REGISTRY.register(Box::new(FILLS.clone())),
        REGISTRY.register(Box::new(CANCELS.clone())),
        REGISTRY.register(Box::new(RETRIES.clone())),
        REGISTRY.register(Box::new(STOPLOSS.clone())),
        REGISTRY.register(Box::new(PENDING.clone())),
        REGISTRY.register(Box::new(POSITION_QTY.clone())),
        REGISTRY.register(Box::new(POSITION_AVG.clone())),
        REGISTRY.register(Box::new(NOTIFY_DROPPED.clone())),
        // Config visibility
        REGISTRY.register(Box::new(CONFIG_FEED_MODE.clone())),
        REGISTRY.register(Box::new(CONFIG_VENUE_MODE.clone())),
        REGISTRY.register(Box::new(CONFIG_STRATEGY_ACTIVE.clone())),
        REGISTRY.register(Box::new(CONFIG_SYMBOL.clone())),
        REGISTRY.register(Box::new(CONFIG_LIVE_TRADING.clone())),
    ] {
        let _ = m;
    }
}

// Encode all metrics in Prometheus text format
fn encode_metrics() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() || buf.is_empty() {
        buf.extend_from_slice(b"# no metrics\n");
    }
    buf
}

// Serve one HTTP request (GET / or /metrics), tiny HTTP 1.1 responder
fn handle_client(mut stream: TcpStream) {
    // Read a bit to consume headers (no full parse)
    let mut _req_buf = [0u8; 1024];
    let _ = stream.read(&mut _req_buf);

    let body = encode_metrics();
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );

    let _ = stream.write_all(header.as_bytes());
    let _ = stream.write_all(&body);
    let _ = stream.flush();
}

// Run the metrics server in a dedicated OS thread (keeps Tokio runtime clean)
pub async fn serve_metrics(port: u16) {
    thread::spawn(move || {
        let addr = format!("0.0.0.0:{port}");
        let listener = match TcpListener::bind(&addr) {
            Ok(l) => l,
            Err(e) => {
                tracing::error!(%addr, ?e, "metrics bind failed, metrics disabled");
                return;
            }
        };
        tracing::info!("metrics listening on http://{addr}/ (and /metrics)");

        for conn in listener.incoming() {
            match conn {
                Ok(stream) => handle_client(stream),
                Err(e) => tracing::warn!(?e, "metrics accept error"),
            }
        }
    });
}

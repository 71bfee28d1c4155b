// ===============================
// src/main.rs
// ===============================
/*
 # jalankan mock (default), paper trading
 RUST_LOG=info cargo run --release -- --strategy ma_crossover

 # konfigurasi yang aktif
 curl -s localhost:9898/metrics | egrep '^config_(feed_mode|venue_mode|symbol|strategy_active|live_trading)'

 # order & antrian retry
 curl -s localhost:9898/metrics | egrep '^(orders_total|pending_orders|retries_total)'
*/
/*
=============================================================================
Project : poll_trader — polling order-lifecycle trading bot in Rust
Module  : main.rs
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
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::{
    select,
    sync::{mpsc, Mutex},
    time::{interval, Duration},
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use poll_trader::config::{self, Instrument, MarketMode};
use poll_trader::domain::{Event, PriceBar};
use poll_trader::gateway::{MockGateway, TradeGateway};
use poll_trader::gateway_binance::BinanceGateway;
use poll_trader::notify::{self, Notifier};
use poll_trader::strategy::Registry;
use poll_trader::trader::Trader;
use poll_trader::{feed, metrics, reconcile, recorder};

/// Harga awal mock feed + mock venue
const MOCK_START_PRICE: f64 = 1000.0;
const MOCK_QUOTE_BALANCE: f64 = 100_000.0;
const MOCK_BAR_EVERY: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(name = "poll_trader", version, about = "Polling order-lifecycle trading bot")]
struct Cli {
    /// Strategy registry key (overrides STRATEGY)
    #[arg(long)]
    strategy: Option<String>,

    /// Instrument, e.g. btc_cny (overrides SYMBOL)
    #[arg(long)]
    symbol: Option<String>,

    /// Tracker state file (overrides STATE_FILE)
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Log filter when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // ---- Logging ----
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // ---- Load config (.env + ENV) lalu override dari CLI ----
    let mut args = config::load();
    if let Some(s) = cli.strategy {
        args.settings.strategy = s;
    }
    if let Some(s) = cli.symbol {
        args.settings.instrument = Instrument::parse(&s);
    }
    if cli.state_file.is_some() {
        args.settings.state_file = cli.state_file;
    }
    let settings = args.settings.clone();

    // ---- Metrics ----
    metrics::init();
    tokio::spawn(metrics::serve_metrics(args.metrics_port));

    // ---- Human-friendly startup info + export config to metrics ----
    info!(
        feed_mode = %args.feed_mode.as_str(),
        venue_mode = %args.venue_mode.as_str(),
        symbol = %settings.instrument.symbol,
        strategy = %settings.strategy,
        live_trading = settings.enable_trading,
        stoploss = ?settings.stoploss_pct,
        state_file = ?settings.state_file,
        binance_ws = %args.binance_ws_url,
        binance_rest = %args.binance_rest_url,
        "startup config"
    );
    metrics::CONFIG_FEED_MODE.with_label_values(&[args.feed_mode.as_str()]).set(1);
    metrics::CONFIG_VENUE_MODE.with_label_values(&[args.venue_mode.as_str()]).set(1);
    metrics::CONFIG_SYMBOL.with_label_values(&[settings.instrument.symbol.as_str()]).set(1);
    metrics::CONFIG_STRATEGY_ACTIVE.with_label_values(&[settings.strategy.as_str()]).set(1);
    metrics::CONFIG_LIVE_TRADING.set(settings.enable_trading as i64);

    // ---- Strategy registry (error = salah konfigurasi, fatal) ----
    let mut registry = match Registry::with_builtins() {
        Ok(r) => r,
        Err(e) => {
            error!(%e, "strategy registration failed");
            std::process::exit(1);
        }
    };
    if !registry.contains(&settings.strategy) {
        error!(strategy = %settings.strategy, known = ?registry.names(), "configured strategy is not registered, ticks will be ignored");
    }

    // ---- Notifier (fire-and-forget) ----
    let (notify_tx, notify_rx) = mpsc::channel::<String>(256);
    tokio::spawn(notify::run(notify_rx, args.notify_webhook.clone()));

    // ---- Recorder (optional) ----
    let rec_tx = args.record_file.clone().map(|path| {
        let (tx, rx) = mpsc::channel::<Event>(8192);
        tokio::spawn(recorder::run(rx, path));
        tx
    });

    // ---- Gateway ----
    let mut mock: Option<Arc<MockGateway>> = None;
    let gateway: Arc<dyn TradeGateway> = match args.venue_mode {
        MarketMode::Mock => {
            let gw = Arc::new(MockGateway::new("mock", &settings.instrument.base, &settings.instrument.quote));
            gw.set_mid(MOCK_START_PRICE);
            gw.set_balance(&settings.instrument.quote, MOCK_QUOTE_BALANCE);
            gw.set_fill_step(0.5);
            mock = Some(gw.clone());
            gw
        }
        MarketMode::BinanceSandbox | MarketMode::BinanceMainnet => {
            let (Some(key), Some(secret)) = (args.binance_api_key.clone(), args.binance_api_secret.clone()) else {
                error!("BINANCE_API_KEY / BINANCE_API_SECRET missing for binance venue");
                std::process::exit(1);
            };
            Arc::new(BinanceGateway::new(
                args.binance_rest_url.clone(),
                key,
                secret,
                args.binance_recv_window,
                settings.instrument.venue_symbol(),
            ))
        }
    };
    info!(gateway = gateway.name(), "gateway ready");

    // ---- Trader (satu-satunya pemilik state order) ----
    let mut trader = Trader::new(gateway, settings.clone()).with_notifier(Notifier::new(notify_tx));
    if let Some(tx) = rec_tx.clone() {
        trader = trader.with_recorder(tx);
    }
    let trader = Arc::new(Mutex::new(trader));

    // ---- FEED (price bars) ----
    let (bar_tx, mut bar_rx) = mpsc::channel::<PriceBar>(1024);
    match args.feed_mode {
        MarketMode::Mock => {
            tokio::spawn(feed::run_mock(bar_tx, MOCK_START_PRICE, MOCK_BAR_EVERY));
        }
        MarketMode::BinanceSandbox | MarketMode::BinanceMainnet => {
            tokio::spawn(feed::run_binance(bar_tx, settings.instrument.venue_symbol(), args.binance_ws_url.clone()));
        }
    }

    // ---- Reconciliation loop (timer sendiri, tidak ikut bar) ----
    tokio::spawn(reconcile::run(trader.clone(), settings.reconcile_interval));

    // ---- Dispatcher + heartbeat ----
    let max_bars = 500 * settings.kline_periods.max(1);
    let mut bars: VecDeque<PriceBar> = VecDeque::with_capacity(max_bars);
    let mut heartbeat = interval(Duration::from_secs(60));
    let mut bar_count: u64 = 0;

    loop {
        select! {
            maybe_bar = bar_rx.recv() => {
                let Some(bar) = maybe_bar else {
                    warn!("feed ended");
                    break;
                };
                bar_count += 1;
                if bars.len() == max_bars {
                    bars.pop_front();
                }
                bars.push_back(bar);
                if let Some(gw) = &mock {
                    gw.set_mid(bar.close);
                }
                if let Some(tx) = &rec_tx {
                    let _ = tx.try_send(Event::Bar { symbol: settings.instrument.symbol.clone(), bar });
                }

                let mut t = trader.lock().await;
                registry.tick(&mut t, bars.make_contiguous()).await;
            },
            _ = heartbeat.tick() => {
                let t = trader.lock().await;
                let st = t.state();
                info!(
                    bars = bar_count,
                    pending_buys = st.pending_buys.len(),
                    pending_sells = st.pending_sells.len(),
                    recancel = st.recancel.len(),
                    resell = st.resell.len(),
                    position = st.position.qty,
                    avg_entry = st.position.avg_price,
                    "heartbeat"
                );
                bar_count = 0;
            },
            _ = tokio::signal::ctrl_c() => {
                info!("ctrl-c, shutting down");
                break;
            }
        }
    }

    // simpan state terakhir sebelum keluar
    trader.lock().await.commit();
}

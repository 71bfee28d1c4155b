// ===============================
// src/trader.rs
// ===============================
//
// `Trader` = pemilik tunggal OrderTrackerState + gateway aktif.
// Placement (placement.rs), rekonsiliasi (reconcile.rs) dan stop-loss
// (stoploss.rs) semuanya `impl Trader` di file masing-masing.
//
// Di main, Trader dibungkus satu `tokio::sync::Mutex`: dispatcher bar dan
// loop rekonsiliasi bergantian memegang lock, tidak pernah paralel.
//
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::config::Settings;
use crate::domain::{Event, OrderBookSnapshot};
use crate::gateway::TradeGateway;
use crate::metrics::{PENDING, POSITION_AVG, POSITION_QTY};
use crate::notify::Notifier;
use crate::positions::PrevTrade;
use crate::tracker::OrderTrackerState;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> { Utc::now() }
}

/// Clock moved by hand, for driving timeouts in tests and replays.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self { Self { now: Mutex::new(start) } }

    pub fn advance(&self, by: Duration) {
        let mut t = self.now.lock().unwrap_or_else(|p| p.into_inner());
        *t += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> { *self.now.lock().unwrap_or_else(|p| p.into_inner()) }
}

pub struct Trader {
    pub(crate) gateway: Arc<dyn TradeGateway>,
    pub(crate) settings: Settings,
    pub(crate) state: OrderTrackerState,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) notifier: Notifier,
    pub(crate) events: Option<mpsc::Sender<Event>>,
    pub(crate) last_price: Option<f64>,
}

impl Trader {
    /// Build a trader; restores the tracker from `settings.state_file` when set.
    pub fn new(gateway: Arc<dyn TradeGateway>, settings: Settings) -> Self {
        let state = match &settings.state_file {
            Some(path) => OrderTrackerState::load(path),
            None => OrderTrackerState::new(),
        };
        Self {
            gateway,
            settings,
            state,
            clock: Arc::new(SystemClock),
            notifier: Notifier::disabled(),
            events: None,
            last_price: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_recorder(mut self, events: mpsc::Sender<Event>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn settings(&self) -> &Settings { &self.settings }
    pub fn state(&self) -> &OrderTrackerState { &self.state }
    pub fn last_price(&self) -> Option<f64> { self.last_price }

    pub(crate) fn set_last_price(&mut self, price: f64) { self.last_price = Some(price); }

    /// Holding (or about to hold) a position the stop-loss must guard.
    pub fn in_position(&self) -> bool {
        self.state.trade.prev == PrevTrade::Buy || !self.state.position.is_flat()
    }

    pub(crate) fn now(&self) -> DateTime<Utc> { self.clock.now() }

    pub(crate) fn record(&self, ev: Event) {
        if let Some(tx) = &self.events {
            let _ = tx.try_send(ev);
        }
    }

    pub(crate) fn notify(&self, msg: impl Into<String>) { self.notifier.notify(msg); }

    /// Pause between mutating gateway calls (rate limit).
    pub(crate) async fn pause(&self) {
        if !self.settings.gateway_pause.is_zero() {
            tokio::time::sleep(self.settings.gateway_pause).await;
        }
    }

    /// Order book, retried once. `None` when both attempts fail.
    pub(crate) async fn order_book_with_retry(&self) -> Option<OrderBookSnapshot> {
        let book = match self.gateway.get_order_book().await {
            Ok(b) => b,
            Err(e) => {
                warn!(?e, "get orderBook failed 1");
                // coba lagi sekali
                match self.gateway.get_order_book().await {
                    Ok(b) => b,
                    Err(e) => {
                        warn!(?e, "get orderBook failed 2");
                        return None;
                    }
                }
            }
        };
        if book.best_ask().is_none() || book.best_bid().is_none() {
            warn!("orderBook has an empty side");
            return None;
        }
        Some(book)
    }

    /// Persist tracker state (if configured) and refresh gauges.
    pub fn commit(&self) {
        if let Some(path) = &self.settings.state_file {
            if let Err(e) = self.state.save(path) {
                error!(?e, path = %path.display(), "tracker state save failed");
            }
        }
        PENDING.with_label_values(&["buy"]).set(self.state.pending_buys.len() as i64);
        PENDING.with_label_values(&["sell"]).set(self.state.pending_sells.len() as i64);
        PENDING.with_label_values(&["recancel"]).set(self.state.recancel.len() as i64);
        PENDING.with_label_values(&["resell"]).set(self.state.resell.len() as i64);
        PENDING.with_label_values(&["escalated"])
            .set((self.state.recancel.escalated().len() + self.state.resell.escalated().len()) as i64);
        POSITION_QTY.set(self.state.position.qty);
        POSITION_AVG.set(self.state.position.avg_price);
    }
}

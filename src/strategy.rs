// ===============================
// src/strategy.rs
// ===============================
//
// Registry + dispatcher strategi. Strategi bawaan:
// 1) ma_crossover  (Trend-Following)  -> MaCrossover
// 2) breakout      (Range Break)      -> Breakout
// 3) OPENORDER     (order management) -> OpenOrders, tidak butuh harga
//
// Pilih lewat env STRATEGY (atau --strategy). Strategi lain cukup
// implement `Strategy` lalu `Registry::register` saat startup.
//
// Urutan per tick (strategi yang konsumsi harga):
//   >= 2 bar -> data-quality filter -> stop-loss (kalau pegang posisi) -> strategi
//
use async_trait::async_trait;
use ahash::AHashMap;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::bars::{aggregate, check_exception};
use crate::domain::{Event, PriceBar};
use crate::metrics::{BAD_TICKS, STRATEGY_TICKS};
use crate::placement::{PlaceError, Placement};
use crate::trader::Trader;

/// Registry key of the built-in strategy that only manages open orders.
pub const ORDER_MANAGEMENT_ONLY: &str = "OPENORDER";

#[async_trait]
pub trait Strategy: Send {
    /// Handle one tick. Returns whether the strategy acted on it.
    async fn tick(&mut self, trader: &mut Trader, bars: &[PriceBar]) -> bool;

    /// Strategies that never look at prices skip the bar checks.
    fn consumes_prices(&self) -> bool { true }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("strategy `{0}` registered twice")]
    Duplicate(String),
    #[error("strategy name is empty")]
    EmptyName,
    #[error("strategy `{0}` has no implementation")]
    Absent(String),
}

#[derive(Default)]
pub struct Registry {
    strategies: AHashMap<String, Box<dyn Strategy>>,
}

impl Registry {
    pub fn new() -> Self { Self::default() }

    /// Registry with `ma_crossover`, `breakout` and `OPENORDER`.
    pub fn with_builtins() -> Result<Self, RegistryError> {
        let mut r = Self::new();
        // Parameter default: fast=5, slow=20 bar, min_edge=0
        r.register("ma_crossover", Some(Box::new(MaCrossover::new(5, 20, 0.0))))?;
        // Parameter default: window=20 bar, edge=0, cooldown=3 bar
        r.register("breakout", Some(Box::new(Breakout::new(20, 0.0, 3))))?;
        r.register(ORDER_MANAGEMENT_ONLY, Some(Box::new(OpenOrders)))?;
        Ok(r)
    }

    /// Startup-time registration; any error here is a configuration mistake.
    pub fn register(&mut self, name: &str, strategy: Option<Box<dyn Strategy>>) -> Result<(), RegistryError> {
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        let Some(strategy) = strategy else {
            return Err(RegistryError::Absent(name.to_string()));
        };
        if self.strategies.contains_key(name) {
            return Err(RegistryError::Duplicate(name.to_string()));
        }
        self.strategies.insert(name.to_string(), strategy);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool { self.strategies.contains_key(name) }

    pub fn names(&self) -> Vec<&str> {
        let mut v: Vec<&str> = self.strategies.keys().map(String::as_str).collect();
        v.sort_unstable();
        v
    }

    /// Dispatch one tick to the configured strategy.
    pub async fn tick(&mut self, trader: &mut Trader, bars: &[PriceBar]) -> bool {
        let name = trader.settings().strategy.clone();
        let Some(strategy) = self.strategies.get_mut(&name) else {
            error!(strategy = %name, "strategy not registered, tick ignored");
            return false;
        };

        if strategy.consumes_prices() {
            let n = bars.len();
            if n < 2 {
                warn!(strategy = %name, bars = n, "need at least 2 bars");
                return false;
            }
            let (prev, last) = (&bars[n - 2], &bars[n - 1]);
            if !check_exception(prev, last) {
                BAD_TICKS.inc();
                warn!(prev_close = prev.close, close = last.close, volume = last.volume, "bad tick skipped");
                trader.record(Event::BadTick { prev_close: prev.close, close: last.close, volume: last.volume });
                return false;
            }
            trader.set_last_price(last.close);
            if trader.in_position() {
                let out = trader.check_stoploss(last.close).await;
                debug!(?out, "stop-loss check");
            }
        }

        let handled = strategy.tick(trader, bars).await;
        STRATEGY_TICKS.with_label_values(&[name.as_str(), if handled { "true" } else { "false" }]).inc();
        handled
    }
}

fn log_placement(strategy: &str, res: &Result<Placement, PlaceError>) {
    match res {
        Ok(p) => info!(strategy, order_id = %p.id(), simulated = p.is_simulated(), "signal placed"),
        // aksi sama dua kali = no-op normal
        Err(PlaceError::Repeated(side)) => debug!(strategy, %side, "signal ignored, already {side}"),
        Err(e) => warn!(strategy, %e, "signal not placed"),
    }
}

fn sma(xs: &[f64]) -> f64 {
    xs.iter().sum::<f64>() / xs.len() as f64
}

// -----------------------------------------------------------------------------
// 1) MOVING AVERAGE CROSSOVER (Trend-Following)
//    MA cepat menembus ke atas MA lambat -> Buy (golden cross)
//    MA cepat menembus ke bawah MA lambat -> Sell (dead cross)
//    Close diambil dari bar hasil aggregate(KLINE_PERIODS).
//    Risiko: choppy market = whipsaw.
// -----------------------------------------------------------------------------
pub struct MaCrossover {
    fast_w: usize,
    slow_w: usize,
    min_edge: f64,
    prev_diff_sign: i8, // -1, 0, +1
}

impl MaCrossover {
    pub fn new(fast_w: usize, slow_w: usize, min_edge: f64) -> Self {
        Self { fast_w: fast_w.max(1), slow_w: slow_w.max(2), min_edge, prev_diff_sign: 0 }
    }

    /// +1 golden cross, -1 dead cross, 0 nothing. `None` while warming up.
    pub fn on_closes(&mut self, closes: &[f64]) -> Option<i8> {
        if closes.len() < self.slow_w {
            return None;
        }
        let fast = sma(&closes[closes.len() - self.fast_w.min(closes.len())..]);
        let slow = sma(&closes[closes.len() - self.slow_w..]);
        let diff = fast - slow;

        // Edge filter: abaikan diff terlalu kecil (noise)
        if diff.abs() <= self.min_edge {
            return Some(0);
        }
        let cur_sign: i8 = if diff > 0.0 { 1 } else { -1 };

        // sign pertama hanya dicatat, belum dianggap cross
        if self.prev_diff_sign == 0 {
            self.prev_diff_sign = cur_sign;
            return Some(0);
        }
        if cur_sign != self.prev_diff_sign {
            self.prev_diff_sign = cur_sign;
            return Some(cur_sign);
        }
        Some(0)
    }
}

#[async_trait]
impl Strategy for MaCrossover {
    async fn tick(&mut self, trader: &mut Trader, bars: &[PriceBar]) -> bool {
        let closes: Vec<f64> = aggregate(bars, trader.settings().kline_periods).iter().map(|b| b.close).collect();
        match self.on_closes(&closes) {
            None => false,
            Some(1) => {
                log_placement("ma_crossover", &trader.buy().await);
                true
            }
            Some(-1) => {
                log_placement("ma_crossover", &trader.sell().await);
                true
            }
            Some(_) => true,
        }
    }
}

// -----------------------------------------------------------------------------
// 2) BREAKOUT (Range Break)
//    Close terakhir > high tertinggi N bar sebelumnya + edge -> Buy
//    Close terakhir < low terendah N bar sebelumnya - edge   -> Sell
//    Cooldown dalam jumlah bar supaya tak spam sinyal.
//    Risiko: false breakout saat harga cepat kembali ke range.
// -----------------------------------------------------------------------------
pub struct Breakout {
    w: usize,
    edge: f64,
    cooldown_bars: u32,
    since_last: u32,
}

impl Breakout {
    pub fn new(w: usize, edge: f64, cooldown_bars: u32) -> Self {
        Self { w: w.max(1), edge, cooldown_bars, since_last: cooldown_bars }
    }

    /// +1 upside break, -1 downside break, 0 inside the range. `None` while warming up.
    pub fn on_bars(&mut self, bars: &[PriceBar]) -> Option<i8> {
        if bars.len() < self.w + 1 {
            return None;
        }
        self.since_last = self.since_last.saturating_add(1);

        let last = bars[bars.len() - 1];
        let window = &bars[bars.len() - 1 - self.w..bars.len() - 1];
        let hi = window.iter().map(|b| b.high).fold(f64::MIN, f64::max);
        let lo = window.iter().map(|b| b.low).fold(f64::MAX, f64::min);

        if self.since_last < self.cooldown_bars {
            return Some(0);
        }
        if last.close > hi + self.edge {
            self.since_last = 0;
            return Some(1);
        }
        if last.close < lo - self.edge {
            self.since_last = 0;
            return Some(-1);
        }
        Some(0)
    }
}

#[async_trait]
impl Strategy for Breakout {
    async fn tick(&mut self, trader: &mut Trader, bars: &[PriceBar]) -> bool {
        let agg = aggregate(bars, trader.settings().kline_periods);
        match self.on_bars(&agg) {
            None => false,
            Some(1) => {
                log_placement("breakout", &trader.buy().await);
                true
            }
            Some(-1) => {
                log_placement("breakout", &trader.sell().await);
                true
            }
            Some(_) => true,
        }
    }
}

// -----------------------------------------------------------------------------
// 3) OPENORDER: tanpa sinyal harga, hanya satu pass rekonsiliasi per tick.
// -----------------------------------------------------------------------------
pub struct OpenOrders;

#[async_trait]
impl Strategy for OpenOrders {
    async fn tick(&mut self, trader: &mut Trader, _bars: &[PriceBar]) -> bool {
        trader.reconcile().await;
        true
    }

    fn consumes_prices(&self) -> bool { false }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::gateway::{GatewayOp, MockGateway};
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use std::sync::Arc;
    use std::time::Duration;

    fn bar(i: i64, close: f64, volume: f64) -> PriceBar {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + ChronoDuration::minutes(i);
        PriceBar { ts, open: close, high: close, low: close, close, volume }
    }

    fn trader(strategy: &str) -> (Arc<MockGateway>, Trader) {
        let gw = Arc::new(MockGateway::new("mock", "btc", "cny"));
        gw.set_book(100.0, 100.01);
        gw.set_balance("cny", 10_000.0);
        let settings = Settings {
            strategy: strategy.into(),
            enable_trading: true,
            trade_amount: 1.0,
            gateway_pause: Duration::ZERO,
            ..Settings::default()
        };
        (gw.clone(), Trader::new(gw, settings))
    }

    struct Counting(Arc<std::sync::atomic::AtomicU32>);

    #[async_trait]
    impl Strategy for Counting {
        async fn tick(&mut self, _trader: &mut Trader, _bars: &[PriceBar]) -> bool {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            true
        }
    }

    #[test]
    fn duplicate_or_absent_registration_fails() {
        let mut r = Registry::with_builtins().unwrap();
        assert_eq!(
            r.register("breakout", Some(Box::new(OpenOrders))),
            Err(RegistryError::Duplicate("breakout".into()))
        );
        assert_eq!(r.register("x", None), Err(RegistryError::Absent("x".into())));
        assert_eq!(r.register("", Some(Box::new(OpenOrders))), Err(RegistryError::EmptyName));
        assert_eq!(r.names(), vec!["OPENORDER", "breakout", "ma_crossover"]);
    }

    #[tokio::test]
    async fn unknown_strategy_is_not_handled() {
        let (gw, mut t) = trader("nope");
        let mut r = Registry::with_builtins().unwrap();
        assert!(!r.tick(&mut t, &[bar(0, 100.0, 5.0), bar(1, 101.0, 5.0)]).await);
        assert_eq!(gw.calls(GatewayOp::OrderBook), 0);
        assert_eq!(t.last_price(), None);
    }

    #[tokio::test]
    async fn bad_tick_skips_strategy() {
        let hits = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let (_gw, mut t) = trader("count");
        let mut r = Registry::new();
        r.register("count", Some(Box::new(Counting(hits.clone())))).unwrap();

        assert!(!r.tick(&mut t, &[bar(0, 100.0, 5.0), bar(1, 115.0, 0.5)]).await);
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert_eq!(t.last_price(), None);

        assert!(r.tick(&mut t, &[bar(0, 100.0, 5.0), bar(1, 108.0, 0.5)]).await);
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(t.last_price(), Some(108.0));

        // satu bar saja belum cukup
        assert!(!r.tick(&mut t, &[bar(0, 100.0, 5.0)]).await);
    }

    #[tokio::test]
    async fn order_management_strategy_ignores_bars() {
        let (gw, mut t) = trader(ORDER_MANAGEMENT_ONLY);
        let mut r = Registry::with_builtins().unwrap();
        t.buy().await.unwrap();
        let id = t.state().pending_buys.values().next().unwrap().id.clone();
        gw.set_deal(&id, 1.0);

        assert!(r.tick(&mut t, &[]).await);
        assert!(t.state().pending_buys.is_empty());
        assert_eq!(t.state().position.qty, 1.0);
    }

    #[test]
    fn ma_crossover_signals_only_on_real_cross() {
        let mut s = MaCrossover::new(2, 4, 0.0);
        assert_eq!(s.on_closes(&[1.0, 2.0, 3.0]), None);
        // fast di atas slow: dicatat dulu
        assert_eq!(s.on_closes(&[1.0, 2.0, 3.0, 4.0]), Some(0));
        assert_eq!(s.on_closes(&[1.0, 2.0, 3.0, 4.0, 5.0]), Some(0));
        // turun tajam -> dead cross
        assert_eq!(s.on_closes(&[2.0, 3.0, 4.0, 5.0, 1.0, 0.5]), Some(-1));
        // naik lagi -> golden cross
        assert_eq!(s.on_closes(&[5.0, 1.0, 0.5, 6.0, 7.0]), Some(1));
    }

    #[test]
    fn breakout_uses_previous_window_and_cooldown() {
        let mut s = Breakout::new(3, 0.0, 2);
        let mut bars: Vec<PriceBar> = (0..3).map(|i| bar(i, 100.0, 5.0)).collect();
        assert_eq!(s.on_bars(&bars), None);
        bars.push(bar(3, 101.0, 5.0));
        assert_eq!(s.on_bars(&bars), Some(1));
        bars.push(bar(4, 90.0, 5.0));
        assert_eq!(s.on_bars(&bars), Some(0)); // cooldown
        bars.push(bar(5, 80.0, 5.0));
        assert_eq!(s.on_bars(&bars), Some(-1));
    }

    #[tokio::test]
    async fn stoploss_runs_before_strategy_when_holding() {
        let (gw, mut t) = trader("count");
        t.settings.stoploss_pct = Some(5.0);
        gw.set_balance("btc", 1.0);
        t.state.position.fold(1.0, 110.0);
        t.state.trade.mark_bought(110.0);
        let hits = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let mut r = Registry::new();
        r.register("count", Some(Box::new(Counting(hits.clone())))).unwrap();

        assert!(r.tick(&mut t, &[bar(0, 101.0, 5.0), bar(1, 100.0, 5.0)]).await);
        assert_eq!(gw.calls(GatewayOp::Sell), 1);
        assert!(t.state().trade.stoploss_armed);
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}

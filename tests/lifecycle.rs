// End-to-end order lifecycle against the in-memory venue, driven by a manual clock.
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use poll_trader::config::Settings;
use poll_trader::domain::{PriceBar, Side};
use poll_trader::gateway::{GatewayOp, MockGateway};
use poll_trader::placement::PlaceError;
use poll_trader::positions::PrevTrade;
use poll_trader::retry::RetryPolicy;
use poll_trader::strategy::{Registry, Strategy, ORDER_MANAGEMENT_ONLY};
use poll_trader::trader::{ManualClock, Trader};

fn bar(i: i64, close: f64) -> PriceBar {
    let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::minutes(i);
    PriceBar { ts, open: close, high: close, low: close, close, volume: 5.0 }
}

fn settings(strategy: &str, live: bool) -> Settings {
    Settings {
        strategy: strategy.into(),
        enable_trading: live,
        trade_amount: 1.0,
        slippage: 0.0,
        gateway_pause: Duration::ZERO,
        retry: RetryPolicy { max_attempts: 5, base_ms: 1_000, max_ms: 8_000, jitter_ms: 0 },
        ..Settings::default()
    }
}

fn venue() -> Arc<MockGateway> {
    let gw = Arc::new(MockGateway::new("mock", "btc", "cny"));
    gw.set_book(1000.0, 1001.0);
    gw.set_balance("cny", 100_000.0);
    gw
}

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()))
}

/// Buys on its first tick, sells on its second, then idles.
struct BuyThenSell(Arc<AtomicU32>);

#[async_trait]
impl Strategy for BuyThenSell {
    async fn tick(&mut self, trader: &mut Trader, _bars: &[PriceBar]) -> bool {
        match self.0.fetch_add(1, Ordering::SeqCst) {
            0 => trader.buy().await.is_ok(),
            1 => trader.sell().await.is_ok(),
            _ => false,
        }
    }
}

#[tokio::test]
async fn paper_trading_round_trip_never_mutates_the_venue() {
    let gw = venue();
    gw.set_balance("btc", 1.0);
    let clock = clock();
    let mut t = Trader::new(gw.clone(), settings("script", false)).with_clock(clock.clone());
    let mut r = Registry::new();
    r.register("script", Some(Box::new(BuyThenSell(Arc::new(AtomicU32::new(0)))))).unwrap();

    assert!(r.tick(&mut t, &[bar(0, 1000.0), bar(1, 1000.5)]).await);
    let buy = t.state().pending_buys.values().next().unwrap().clone();
    assert!(buy.id.is_simulated());
    assert_eq!(t.state().trade.prev, PrevTrade::Buy);

    t.reconcile().await;
    assert_eq!(t.state().position.qty, 1.0);

    assert!(r.tick(&mut t, &[bar(1, 1000.5), bar(2, 1001.0)]).await);
    assert_eq!(t.state().pending_sells.len(), 1);
    assert_eq!(t.state().trade.prev, PrevTrade::Sell);

    clock.advance(chrono::Duration::seconds(3));
    t.reconcile().await;
    assert!(t.state().position.is_flat());
    assert!(t.state().pending_sells.is_empty());

    assert_eq!(gw.mutating_calls(), 0);
    assert_eq!(gw.calls(GatewayOp::GetOrder), 0);
}

#[tokio::test]
async fn repeated_buy_is_idempotent() {
    let gw = venue();
    let mut t = Trader::new(gw.clone(), settings("x", true)).with_clock(clock());
    t.buy().await.unwrap();
    assert!(matches!(t.buy().await, Err(PlaceError::Repeated(Side::Buy))));
    assert_eq!(gw.calls(GatewayOp::Buy), 1);
    assert_eq!(t.state().pending_buys.len(), 1);
}

#[tokio::test]
async fn order_management_ticks_drive_cancel_recovery() {
    let gw = venue();
    let clock = clock();
    let mut t = Trader::new(gw.clone(), settings(ORDER_MANAGEMENT_ONLY, true)).with_clock(clock.clone());
    let mut r = Registry::with_builtins().unwrap();

    let id = t.buy().await.unwrap().id().clone();
    gw.set_deal(&id, 0.25);

    // belum timeout: tidak ada yang berubah
    assert!(r.tick(&mut t, &[]).await);
    assert_eq!(t.state().pending_buys.len(), 1);
    assert!(t.state().position.is_flat());

    clock.advance(chrono::Duration::seconds(121));
    gw.fail_next(GatewayOp::Cancel, 1);
    r.tick(&mut t, &[]).await;
    assert!(t.state().pending_buys.is_empty());
    assert_eq!(t.state().recancel.len(), 1);
    assert!((t.state().position.qty - 0.25).abs() < 1e-9);

    // partial tidak di-fold dua kali walau pass berulang
    r.tick(&mut t, &[]).await;
    r.tick(&mut t, &[]).await;
    assert!(t.state().recancel.is_empty());
    assert!((t.state().position.qty - 0.25).abs() < 1e-9);
    assert_eq!(gw.canceled(), vec![id]);
}

#[tokio::test]
async fn gradual_fills_complete_through_polling() {
    let gw = venue();
    gw.set_fill_step(0.5);
    let mut t = Trader::new(gw.clone(), settings("x", true)).with_clock(clock());
    t.buy().await.unwrap();

    let first = t.reconcile().await;
    assert_eq!(first.buys_filled, 0);
    let second = t.reconcile().await;
    assert_eq!(second.buys_filled, 1);
    assert_eq!(t.state().position.qty, 1.0);
    assert_eq!(t.state().position.avg_price, 1000.0);
    assert_eq!(gw.balance("btc"), 1.0);
}

#[tokio::test]
async fn transient_poll_error_keeps_order_pending() {
    let gw = venue();
    let mut t = Trader::new(gw.clone(), settings("x", true)).with_clock(clock());
    let id = t.buy().await.unwrap().id().clone();
    gw.set_deal(&id, 1.0);
    gw.fail_next(GatewayOp::GetOrder, 1);

    t.reconcile().await;
    assert_eq!(t.state().pending_buys.len(), 1);
    t.reconcile().await;
    assert!(t.state().pending_buys.is_empty());
    assert_eq!(t.state().position.qty, 1.0);
}

#[tokio::test]
async fn stoploss_exit_then_reentry() {
    let gw = venue();
    let clock = clock();
    let mut s = settings("script", true);
    s.stoploss_pct = Some(5.0);
    s.disciple_mode = true;
    s.disciple_value = 10.0;
    let hits = Arc::new(AtomicU32::new(0));
    let mut t = Trader::new(gw.clone(), s).with_clock(clock.clone());
    let mut r = Registry::new();
    r.register("script", Some(Box::new(BuyThenSell(hits.clone())))).unwrap();

    // tick 1: strategi buy @1000
    r.tick(&mut t, &[bar(0, 1000.0), bar(1, 1000.0)]).await;
    let id = t.state().pending_buys.values().next().unwrap().id.clone();
    gw.set_deal(&id, 1.0);
    t.reconcile().await;
    assert_eq!(t.state().position.avg_price, 1000.0);

    // harga jatuh ke 949: stop-loss jual dulu, lalu strategi (sell) jadi no-op
    gw.set_book(948.0, 949.0);
    r.tick(&mut t, &[bar(1, 955.0), bar(2, 949.0)]).await;
    assert!(t.state().trade.stoploss_armed);
    assert_eq!(gw.calls(GatewayOp::Sell), 1);
    let sell = t.state().pending_sells.values().next().unwrap();
    // floor disciple (1010) tidak dipakai
    assert_eq!(sell.price, 949.0);

    // buy berikutnya membersihkan flag
    t.buy().await.unwrap();
    assert!(!t.state().trade.stoploss_armed);
}

// ===============================
// src/stoploss.rs (stop-loss monitor)
// ===============================
//
// threshold = entry * (1 - STOPLOSS/100)
// entry     = weighted average posisi, kalau masih 0 pakai harga buy terakhir.
// harga <= threshold -> armed + Sell() tanpa disciple floor.
// Selama sell stop-loss masih berjalan, tidak dicek ulang.
//
use tracing::{info, warn};

use crate::domain::Event;
use crate::metrics::STOPLOSS;
use crate::placement::{PlaceError, Placement};
use crate::positions::PrevTrade;
use crate::trader::Trader;

pub fn stoploss_threshold(entry: f64, pct: f64) -> f64 {
    entry * (1.0 - pct * 0.01)
}

#[derive(Debug)]
pub enum StopLossOutcome {
    /// STOPLOSS unset or unparseable.
    Disabled,
    /// Nothing bought yet, no entry price to guard.
    NoEntry,
    Holding { threshold: f64 },
    /// A stop-loss sell is already under way.
    Exiting,
    Triggered { threshold: f64, sell: Result<Placement, PlaceError> },
}

impl StopLossOutcome {
    pub fn triggered(&self) -> bool { matches!(self, StopLossOutcome::Triggered { .. }) }
}

impl Trader {
    /// Entry price the stop-loss guards, if any.
    pub fn entry_price(&self) -> Option<f64> {
        let avg = self.state.position.avg_price;
        if avg > 0.0 {
            return Some(avg);
        }
        let last_buy = self.state.trade.prev_buy_price;
        (last_buy > 0.0).then_some(last_buy)
    }

    pub async fn check_stoploss(&mut self, price: f64) -> StopLossOutcome {
        let Some(pct) = self.settings.stoploss_pct else {
            return StopLossOutcome::Disabled;
        };
        let trade = &self.state.trade;
        if trade.stoploss_armed && trade.prev == PrevTrade::Sell {
            return StopLossOutcome::Exiting;
        }
        let Some(entry) = self.entry_price() else {
            return StopLossOutcome::NoEntry;
        };

        let threshold = stoploss_threshold(entry, pct);
        if price > threshold {
            return StopLossOutcome::Holding { threshold };
        }

        warn!(price, entry, threshold, pct, "stop-loss triggered");
        STOPLOSS.inc();
        self.record(Event::StopLoss { price, threshold });
        self.notify(format!("[STOPLOSS] price {price:.4} <= {threshold:.4} (entry {entry:.4}, {pct}%)"));

        self.state.trade.stoploss_armed = true;
        let sell = self.sell().await;
        match &sell {
            Ok(p) => info!(order_id = %p.id(), "stop-loss sell placed"),
            Err(e) => warn!(%e, "stop-loss sell not placed"),
        }
        StopLossOutcome::Triggered { threshold, sell }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::gateway::{GatewayOp, MockGateway};
    use std::sync::Arc;
    use std::time::Duration;

    fn setup(pct: Option<f64>) -> (Arc<MockGateway>, Trader) {
        let gw = Arc::new(MockGateway::new("mock", "btc", "cny"));
        gw.set_book(948.0, 950.0);
        gw.set_balance("btc", 1.0);
        let settings = Settings {
            enable_trading: true,
            trade_amount: 1.0,
            stoploss_pct: pct,
            disciple_mode: true,
            disciple_value: 5.0,
            gateway_pause: Duration::ZERO,
            ..Settings::default()
        };
        (gw.clone(), Trader::new(gw, settings))
    }

    #[test]
    fn threshold_uses_percent() {
        assert!((stoploss_threshold(1000.0, 5.0) - 950.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn triggers_at_949_not_at_951() {
        let (gw, mut t) = setup(Some(5.0));
        t.state.position.fold(1.0, 1000.0);
        t.state.trade.mark_bought(1000.0);

        let out = t.check_stoploss(951.0).await;
        assert!(matches!(out, StopLossOutcome::Holding { .. }));
        assert_eq!(gw.calls(GatewayOp::Sell), 0);

        let out = t.check_stoploss(949.0).await;
        assert!(out.triggered());
        assert_eq!(gw.calls(GatewayOp::Sell), 1);
        assert!(t.state().trade.stoploss_armed);

        // disciple floor (1000 + 5) tidak dipakai saat stop-loss
        let order = t.state().pending_sells.values().next().unwrap();
        assert!((order.price - 949.99).abs() < 1e-9);
    }

    #[tokio::test]
    async fn pending_stoploss_exit_is_not_triggered_again() {
        let (gw, mut t) = setup(Some(5.0));
        t.state.position.fold(1.0, 1000.0);
        t.state.trade.mark_bought(1000.0);

        assert!(t.check_stoploss(949.0).await.triggered());
        assert!(t.in_position());

        // bar berikutnya masih di bawah threshold, sell belum fill
        assert!(matches!(t.check_stoploss(940.0).await, StopLossOutcome::Exiting));
        assert!(matches!(t.check_stoploss(930.0).await, StopLossOutcome::Exiting));
        assert_eq!(gw.calls(GatewayOp::Sell), 1);
        assert_eq!(gw.calls(GatewayOp::OrderBook), 1);
        assert_eq!(t.state().pending_sells.len(), 1);
    }

    #[tokio::test]
    async fn failed_stoploss_sell_is_retried_on_next_bar() {
        let (gw, mut t) = setup(Some(5.0));
        t.state.position.fold(1.0, 1000.0);
        t.state.trade.mark_bought(1000.0);
        gw.fail_next(GatewayOp::Sell, 1);

        let out = t.check_stoploss(949.0).await;
        assert!(matches!(out, StopLossOutcome::Triggered { sell: Err(_), .. }));
        assert!(t.check_stoploss(948.0).await.triggered());
        assert_eq!(gw.calls(GatewayOp::Sell), 2);
        assert_eq!(t.state().pending_sells.len(), 1);
    }

    #[tokio::test]
    async fn falls_back_to_last_buy_price() {
        let (_gw, mut t) = setup(Some(5.0));
        assert!(matches!(t.check_stoploss(1.0).await, StopLossOutcome::NoEntry));
        t.state.trade.mark_bought(1000.0);
        assert_eq!(t.entry_price(), Some(1000.0));
        assert!(t.check_stoploss(940.0).await.triggered());
    }

    #[tokio::test]
    async fn misconfigured_percent_never_triggers() {
        let (gw, mut t) = setup(None);
        t.state.position.fold(1.0, 1000.0);
        assert!(matches!(t.check_stoploss(1.0).await, StopLossOutcome::Disabled));
        assert_eq!(gw.mutating_calls(), 0);
    }

    #[tokio::test]
    async fn next_buy_clears_armed_flag() {
        let (gw, mut t) = setup(Some(5.0));
        gw.set_balance("cny", 10_000.0);
        t.state.trade.mark_bought(1000.0);
        t.check_stoploss(900.0).await;
        assert!(t.state().trade.stoploss_armed);
        t.buy().await.unwrap();
        assert!(!t.state().trade.stoploss_armed);
    }
}

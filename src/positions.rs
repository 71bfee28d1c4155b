// ===============================
// src/positions.rs (entry price & trade state)
// ===============================

use serde::{Deserialize, Serialize};

/// Running weighted-average entry of the single open position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionAccount {
    pub avg_price: f64,
    pub qty: f64,
}

impl PositionAccount {
    /// Fold one fill into the online weighted mean. Returns the new average.
    pub fn fold(&mut self, fill_qty: f64, fill_price: f64) -> f64 {
        let total = self.qty + fill_qty;
        if total <= 0.0 {
            return self.avg_price;
        }
        self.avg_price = (self.qty * self.avg_price + fill_qty * fill_price) / total;
        self.qty = total;
        self.avg_price
    }

    /// Sold quantity leaves the position; the average of the rest is unchanged.
    pub fn reduce(&mut self, sold_qty: f64) {
        self.qty -= sold_qty;
        // sisa debu dianggap flat
        if self.qty <= 1e-9 {
            self.qty = 0.0;
            self.avg_price = 0.0;
        }
    }

    pub fn is_flat(&self) -> bool { self.qty <= 0.0 }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrevTrade {
    #[default]
    None,
    Buy,
    Sell,
}

/// Process-level trade memory used for idempotent Buy/Sell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeState {
    pub prev: PrevTrade,
    pub prev_buy_price: f64,
    pub stoploss_armed: bool,
}

impl TradeState {
    pub fn mark_bought(&mut self, price: f64) {
        self.prev = PrevTrade::Buy;
        self.prev_buy_price = price;
    }

    pub fn mark_sold(&mut self) {
        self.prev = PrevTrade::Sell;
        self.prev_buy_price = 0.0;
    }
}

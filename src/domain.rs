// ===============================
// src/domain.rs
// ===============================
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side { Buy, Sell }
impl Side {
    pub fn as_str(&self) -> &'static str { match self { Side::Buy => "buy", Side::Sell => "sell" } }
}
impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// One OHLCV bar (k-line). Immutable once produced by the feed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub ts: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BookLevel { pub price: f64, pub qty: f64 }

/// Order book as returned by the gateway.
///
/// Convention: `asks` listed from the highest price down, so the best
/// (lowest) ask is LAST; `bids` best (highest) bid FIRST.
/// Gateways must normalise to this.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub asks: Vec<BookLevel>,
    pub bids: Vec<BookLevel>,
}

impl OrderBookSnapshot {
    pub fn best_ask(&self) -> Option<f64> { self.asks.last().map(|l| l.price) }
    pub fn best_bid(&self) -> Option<f64> { self.bids.first().map(|l| l.price) }
}

/// Available balances keyed by lower-case asset name (e.g. "btc", "cny").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Balances {
    pub available: std::collections::HashMap<String, f64>,
}

impl Balances {
    pub fn available(&self, asset: &str) -> f64 {
        self.available.get(&asset.to_ascii_lowercase()).copied().unwrap_or(0.0)
    }
}

/// Exchange-assigned order identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderId(String);

impl OrderId {
    pub fn new(id: impl Into<String>) -> Self { Self(id.into()) }
    pub fn simulated(n: u64) -> Self { Self(format!("-{n}")) }
    pub fn as_str(&self) -> &str { &self.0 }
    /// Simulated ids are negative integers and never exist at the gateway.
    pub fn is_simulated(&self) -> bool {
        self.0.starts_with('-') && self.0[1..].parse::<u64>().is_ok()
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl From<&str> for OrderId {
    fn from(s: &str) -> Self { Self(s.to_string()) }
}

/// Order status as polled from the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayOrder {
    pub id: OrderId,
    pub side: Side,
    pub price: f64,
    pub amount: f64,
    pub deal_amount: f64,
}

/// Audit events written by the recorder.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    Bar { symbol: String, bar: PriceBar },
    BadTick { prev_close: f64, close: f64, volume: f64 },
    Submitted { seq: u64, id: OrderId, side: Side, price: f64, qty: f64, simulated: bool },
    Filled { id: OrderId, side: Side, qty: f64, price: f64, avg_entry: f64, position: f64 },
    Canceled { id: OrderId, side: Side, ok: bool },
    Retry { kind: String, id: Option<OrderId>, ok: bool, attempts: u32 },
    Escalated { kind: String, detail: String },
    StopLoss { price: f64, threshold: f64 },
}

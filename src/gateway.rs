// ===============================
// src/gateway.rs (trading gateway contract + mock venue)
// ===============================
//
// Semua operasi polling / request-response. Error dari gateway selalu
// dianggap transient oleh pemanggil: "coba lagi atau skip tick ini",
// bukan "order tidak ada".
//
use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::domain::{Balances, BookLevel, GatewayOrder, OrderBookSnapshot, OrderId, Side};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("api error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("order rejected: {0}")]
    Rejected(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("order not found: {0}")]
    NotFound(OrderId),
}

#[async_trait]
pub trait TradeGateway: Send + Sync {
    fn name(&self) -> &str;
    async fn get_account(&self) -> Result<Balances, GatewayError>;
    async fn get_order_book(&self) -> Result<OrderBookSnapshot, GatewayError>;
    async fn buy(&self, price: f64, qty: f64) -> Result<OrderId, GatewayError>;
    async fn sell(&self, price: f64, qty: f64) -> Result<OrderId, GatewayError>;
    async fn cancel_order(&self, id: &OrderId) -> Result<(), GatewayError>;
    async fn get_order(&self, id: &OrderId) -> Result<GatewayOrder, GatewayError>;
}

/// Operations of the contract, used to script failures on the mock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayOp {
    Account,
    OrderBook,
    Buy,
    Sell,
    Cancel,
    GetOrder,
}

#[derive(Debug, Default)]
struct MockState {
    best_bid: f64,
    best_ask: f64,
    depth: usize,
    balances: HashMap<String, f64>,
    base: String,
    quote: String,
    orders: HashMap<String, GatewayOrder>,
    canceled: Vec<OrderId>,
    next_id: u64,
    /// Fraction of the order amount that fills on every poll.
    fill_step: f64,
    fail_next: HashMap<GatewayOp, u32>,
    calls: HashMap<GatewayOp, u32>,
}

/// In-memory venue: order book around a mid price, balances, and orders
/// that fill gradually as they are polled.
pub struct MockGateway {
    name: String,
    st: Mutex<MockState>,
}

impl MockGateway {
    pub fn new(name: impl Into<String>, base: &str, quote: &str) -> Self {
        let st = MockState {
            best_bid: 100.0,
            best_ask: 100.01,
            depth: 5,
            base: base.to_ascii_lowercase(),
            quote: quote.to_ascii_lowercase(),
            next_id: 1000,
            ..Default::default()
        };
        Self { name: name.into(), st: Mutex::new(st) }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        // state mock tidak pernah dipakai lintas panic; poison diabaikan
        self.st.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn set_book(&self, best_bid: f64, best_ask: f64) {
        let mut st = self.lock();
        st.best_bid = best_bid;
        st.best_ask = best_ask;
    }

    /// Recentre the book on `mid` with a one-cent spread.
    pub fn set_mid(&self, mid: f64) {
        self.set_book(mid - 0.005, mid + 0.005);
    }

    pub fn set_balance(&self, asset: &str, qty: f64) {
        self.lock().balances.insert(asset.to_ascii_lowercase(), qty);
    }

    pub fn set_fill_step(&self, step: f64) {
        self.lock().fill_step = step.clamp(0.0, 1.0);
    }

    /// Set the cumulative filled amount of an order and settle balances.
    pub fn set_deal(&self, id: &OrderId, deal_amount: f64) {
        let mut st = self.lock();
        Self::settle(&mut st, id.as_str(), deal_amount);
    }

    /// Make the next `times` calls of `op` fail with a transport error.
    pub fn fail_next(&self, op: GatewayOp, times: u32) {
        self.lock().fail_next.insert(op, times);
    }

    pub fn calls(&self, op: GatewayOp) -> u32 {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    pub fn mutating_calls(&self) -> u32 {
        self.calls(GatewayOp::Buy) + self.calls(GatewayOp::Sell) + self.calls(GatewayOp::Cancel)
    }

    pub fn order(&self, id: &OrderId) -> Option<GatewayOrder> {
        self.lock().orders.get(id.as_str()).cloned()
    }

    pub fn canceled(&self) -> Vec<OrderId> {
        self.lock().canceled.clone()
    }

    pub fn balance(&self, asset: &str) -> f64 {
        self.lock().balances.get(&asset.to_ascii_lowercase()).copied().unwrap_or(0.0)
    }

    fn enter(&self, op: GatewayOp) -> Result<std::sync::MutexGuard<'_, MockState>, GatewayError> {
        let mut st = self.lock();
        *st.calls.entry(op).or_insert(0) += 1;
        if let Some(n) = st.fail_next.get_mut(&op) {
            if *n > 0 {
                *n -= 1;
                return Err(GatewayError::Transport(format!("mock {op:?} failure")));
            }
        }
        Ok(st)
    }

    fn settle(st: &mut MockState, id: &str, deal_amount: f64) {
        let (base, quote) = (st.base.clone(), st.quote.clone());
        let Some(o) = st.orders.get_mut(id) else { return };
        let target = deal_amount.clamp(0.0, o.amount);
        let delta = target - o.deal_amount;
        if delta <= 0.0 {
            return;
        }
        o.deal_amount = target;
        let (side, price) = (o.side, o.price);
        let (db, dq) = match side {
            Side::Buy => (delta, -delta * price),
            Side::Sell => (-delta, delta * price),
        };
        *st.balances.entry(base).or_insert(0.0) += db;
        *st.balances.entry(quote).or_insert(0.0) += dq;
    }

    fn submit(st: &mut MockState, side: Side, price: f64, qty: f64) -> Result<OrderId, GatewayError> {
        if !(price > 0.0) || !(qty > 0.0) {
            return Err(GatewayError::Rejected(format!("bad price/qty {price}/{qty}")));
        }
        st.next_id += 1;
        let id = OrderId::new(st.next_id.to_string());
        st.orders.insert(
            id.as_str().to_string(),
            GatewayOrder { id: id.clone(), side, price, amount: qty, deal_amount: 0.0 },
        );
        debug!(order_id = %id, %side, price, qty, "mock order accepted");
        Ok(id)
    }
}

#[async_trait]
impl TradeGateway for MockGateway {
    fn name(&self) -> &str { &self.name }

    async fn get_account(&self) -> Result<Balances, GatewayError> {
        let st = self.enter(GatewayOp::Account)?;
        Ok(Balances { available: st.balances.clone() })
    }

    async fn get_order_book(&self) -> Result<OrderBookSnapshot, GatewayError> {
        let st = self.enter(GatewayOp::OrderBook)?;
        let tick = 0.01;
        // asks dari harga tertinggi -> best ask di akhir
        let asks = (0..st.depth)
            .rev()
            .map(|i| BookLevel { price: st.best_ask + tick * i as f64, qty: 1.0 })
            .collect();
        let bids = (0..st.depth)
            .map(|i| BookLevel { price: st.best_bid - tick * i as f64, qty: 1.0 })
            .collect();
        Ok(OrderBookSnapshot { asks, bids })
    }

    async fn buy(&self, price: f64, qty: f64) -> Result<OrderId, GatewayError> {
        let mut st = self.enter(GatewayOp::Buy)?;
        Self::submit(&mut st, Side::Buy, price, qty)
    }

    async fn sell(&self, price: f64, qty: f64) -> Result<OrderId, GatewayError> {
        let mut st = self.enter(GatewayOp::Sell)?;
        Self::submit(&mut st, Side::Sell, price, qty)
    }

    async fn cancel_order(&self, id: &OrderId) -> Result<(), GatewayError> {
        let mut st = self.enter(GatewayOp::Cancel)?;
        if !st.orders.contains_key(id.as_str()) {
            return Err(GatewayError::NotFound(id.clone()));
        }
        st.canceled.push(id.clone());
        Ok(())
    }

    async fn get_order(&self, id: &OrderId) -> Result<GatewayOrder, GatewayError> {
        let mut st = self.enter(GatewayOp::GetOrder)?;
        let step = st.fill_step;
        let canceled = st.canceled.contains(id);
        let Some(o) = st.orders.get(id.as_str()).cloned() else {
            return Err(GatewayError::NotFound(id.clone()));
        };
        if step > 0.0 && !canceled {
            Self::settle(&mut st, id.as_str(), o.deal_amount + o.amount * step);
        }
        st.orders.get(id.as_str()).cloned().ok_or_else(|| GatewayError::NotFound(id.clone()))
    }
}

// ===============================
// src/tracker.rs (order tracker state)
// ===============================
//
// Satu objek state untuk semua yang dulu "global":
// pending buy/sell, catatan order yang sudah deal, antrian recancel/resell,
// posisi (weighted average) dan trade state.
//
// Hanya satu writer (Trader) yang boleh memutasi state ini.
//
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::domain::{OrderId, Side};
use crate::positions::{PositionAccount, TradeState};
use crate::retry::RetryQueue;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedOrder {
    pub seq: u64,
    pub id: OrderId,
    pub side: Side,
    pub price: f64,
    pub qty: f64,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DealtOrder {
    pub seq: u64,
    pub id: OrderId,
    pub side: Side,
    pub price: f64,
    pub filled: f64,
    pub at: DateTime<Utc>,
}

/// Cancel that failed once and must be retried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecancelJob {
    pub seq: u64,
    pub id: OrderId,
    pub side: Side,
    pub price: f64,
    pub requested: f64,
    /// Filled quantity already reflected in the position.
    pub accounted: f64,
    /// Last fill seen at the venue; used when the closing poll fails.
    #[serde(default)]
    pub last_filled: f64,
}

/// Unsold remainder waiting for a new sell order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResellJob {
    pub qty: f64,
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("state file io: {0}")]
    Io(#[from] std::io::Error),
    #[error("state file json: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderTrackerState {
    next_seq: u64,
    next_sim: u64,
    pub pending_buys: BTreeMap<u64, TrackedOrder>,
    pub pending_sells: BTreeMap<u64, TrackedOrder>,
    pub dealt: Vec<DealtOrder>,
    pub recancel: RetryQueue<RecancelJob>,
    pub resell: RetryQueue<ResellJob>,
    pub position: PositionAccount,
    pub trade: TradeState,
}

impl OrderTrackerState {
    pub fn new() -> Self { Self::default() }

    /// Start tracking a successfully submitted order. Returns its sequence id.
    pub fn track(&mut self, id: OrderId, side: Side, price: f64, qty: f64, now: DateTime<Utc>) -> u64 {
        self.next_seq += 1;
        let seq = self.next_seq;
        let order = TrackedOrder { seq, id, side, price, qty, submitted_at: now };
        debug!(seq, order_id = %order.id, %side, price, qty, "order tracked");
        match side {
            Side::Buy => self.pending_buys.insert(seq, order),
            Side::Sell => self.pending_sells.insert(seq, order),
        };
        seq
    }

    pub fn next_simulated_id(&mut self) -> OrderId {
        self.next_sim += 1;
        OrderId::simulated(self.next_sim)
    }

    pub fn untrack(&mut self, side: Side, seq: u64) -> Option<TrackedOrder> {
        match side {
            Side::Buy => self.pending_buys.remove(&seq),
            Side::Sell => self.pending_sells.remove(&seq),
        }
    }

    /// Fold a buy fill into the entry average and keep a dealt record.
    pub fn record_buy_fill(&mut self, seq: u64, id: &OrderId, filled: f64, price: f64, now: DateTime<Utc>) -> f64 {
        let avg = self.position.fold(filled, price);
        self.dealt.push(DealtOrder { seq, id: id.clone(), side: Side::Buy, price, filled, at: now });
        info!(order_id = %id, filled, price, avg_entry = avg, position = self.position.qty, "buy fill folded");
        avg
    }

    /// Sold quantity leaves the position.
    pub fn record_sell_fill(&mut self, seq: u64, id: &OrderId, filled: f64, price: f64, now: DateTime<Utc>) {
        self.position.reduce(filled);
        self.dealt.push(DealtOrder { seq, id: id.clone(), side: Side::Sell, price, filled, at: now });
        info!(order_id = %id, filled, position = self.position.qty, "sell fill applied");
    }

    /// Load from `path`. Missing file gives a fresh state, corrupt file is logged and replaced.
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(data) => match serde_json::from_str::<Self>(&data) {
                Ok(st) => {
                    info!(
                        path = %path.display(),
                        pending_buys = st.pending_buys.len(),
                        pending_sells = st.pending_sells.len(),
                        recancel = st.recancel.len(),
                        resell = st.resell.len(),
                        "tracker state restored"
                    );
                    st
                }
                Err(e) => {
                    warn!(?e, path = %path.display(), "tracker state corrupt, starting fresh");
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    /// Write to temp, fsync, rename.
    pub fn save(&self, path: &Path) -> Result<(), StateError> {
        let json = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = path.with_extension("tmp");
        let mut file = fs::File::create(&tmp)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

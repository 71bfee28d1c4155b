// ===============================
// src/lib.rs
// ===============================
pub mod domain;
pub mod config;
pub mod metrics;
pub mod recorder;
pub mod notify;
pub mod bars;
pub mod feed;
pub mod retry;
pub mod positions;
pub mod tracker;
pub mod gateway;          // contract + mock venue (in-memory)
pub mod binance;          // helper (signer/models) for Binance
pub mod gateway_binance;  // real Binance Spot (REST polling)
pub mod trader;
pub mod placement;
pub mod stoploss;
pub mod reconcile;
pub mod strategy;

// ===============================
// src/binance.rs
// ===============================
//
// Helper Binance Spot: signer HMAC-SHA256, format angka, dan model serde
// untuk REST (account / depth / order) + stream kline.
//
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{TimeZone, Utc};

use crate::domain::{BookLevel, OrderBookSnapshot, PriceBar};

pub fn timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

pub fn sign_query(secret: &str, query: &str) -> Result<String, hmac::digest::InvalidLength> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())?;
    mac.update(query.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Decimal string Binance accepts: max 8 decimals, no trailing zeros.
pub fn fmt_num(x: f64) -> String {
    let s = format!("{x:.8}");
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s.is_empty() || s == "-" { "0".to_string() } else { s.to_string() }
}

fn num(s: &str) -> f64 {
    s.parse::<f64>().unwrap_or(0.0)
}

// ---- REST models ----

#[derive(Debug, Deserialize)]
pub struct AccountResp {
    pub balances: Vec<AssetBalance>,
}

#[derive(Debug, Deserialize)]
pub struct AssetBalance {
    pub asset: String,
    pub free: String,
}

#[derive(Debug, Deserialize)]
pub struct DepthResp {
    pub bids: Vec<[String; 2]>,
    pub asks: Vec<[String; 2]>,
}

impl DepthResp {
    /// Binance lists asks best-first; the contract wants best ask last.
    pub fn into_snapshot(self) -> OrderBookSnapshot {
        let level = |l: &[String; 2]| BookLevel { price: num(&l[0]), qty: num(&l[1]) };
        let bids = self.bids.iter().map(level).collect();
        let asks = self.asks.iter().rev().map(level).collect();
        OrderBookSnapshot { asks, bids }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResp {
    pub order_id: u64,
    #[serde(default)]
    pub side: String,
    #[serde(default)]
    pub price: String,
    #[serde(default)]
    pub orig_qty: String,
    #[serde(default)]
    pub executed_qty: String,
    #[serde(default)]
    pub status: String,
}

impl OrderResp {
    pub fn price(&self) -> f64 { num(&self.price) }
    pub fn orig_qty(&self) -> f64 { num(&self.orig_qty) }
    pub fn executed_qty(&self) -> f64 { num(&self.executed_qty) }
}

// ---- kline stream ----
// {"e":"kline","E":1672515782136,"s":"BNBBTC","k":{"t":1672515780000,"o":"0.0010","c":"0.0020",
//  "h":"0.0025","l":"0.0015","v":"1000","x":false,...}}

#[derive(Debug, Deserialize)]
pub struct KlineEvent {
    pub k: Kline,
}

#[derive(Debug, Deserialize)]
pub struct Kline {
    /// open time (ms)
    pub t: i64,
    pub o: String,
    pub h: String,
    pub l: String,
    pub c: String,
    pub v: String,
    /// bar closed
    pub x: bool,
}

/// Closed kline as a bar; `None` for open klines and garbage.
pub fn parse_closed_kline(txt: &str) -> Option<PriceBar> {
    let ev: KlineEvent = serde_json::from_str(txt).ok()?;
    let k = ev.k;
    if !k.x {
        return None;
    }
    let ts = Utc.timestamp_millis_opt(k.t).single()?;
    let bar = PriceBar { ts, open: num(&k.o), high: num(&k.h), low: num(&k.l), close: num(&k.c), volume: num(&k.v) };
    (bar.close > 0.0).then_some(bar)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_matches_binance_docs() {
        let secret = "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j";
        let query = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559";
        assert_eq!(
            sign_query(secret, query).unwrap(),
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }

    #[test]
    fn numbers_are_trimmed() {
        assert_eq!(fmt_num(0.1), "0.1");
        assert_eq!(fmt_num(100.0), "100");
        assert_eq!(fmt_num(1000.99), "1000.99");
        assert_eq!(fmt_num(0.0), "0");
    }

    #[test]
    fn depth_asks_reversed() {
        let d: DepthResp = serde_json::from_str(
            r#"{"lastUpdateId":1,"bids":[["99.0","1"],["98.0","2"]],"asks":[["101.0","1"],["102.0","3"]]}"#,
        )
        .unwrap();
        let book = d.into_snapshot();
        assert_eq!(book.best_bid(), Some(99.0));
        assert_eq!(book.best_ask(), Some(101.0));
        assert_eq!(book.asks[0].price, 102.0);
    }

    #[test]
    fn only_closed_klines_become_bars() {
        let open = r#"{"e":"kline","k":{"t":1672515780000,"o":"1","h":"2","l":"0.5","c":"1.5","v":"10","x":false}}"#;
        let closed = r#"{"e":"kline","k":{"t":1672515780000,"o":"1","h":"2","l":"0.5","c":"1.5","v":"10","x":true}}"#;
        assert!(parse_closed_kline(open).is_none());
        let bar = parse_closed_kline(closed).unwrap();
        assert_eq!(bar.close, 1.5);
        assert_eq!(bar.volume, 10.0);
        assert!(parse_closed_kline("not json").is_none());
    }
}

// ===============================
// src/gateway_binance.rs
// ===============================
//
// Binance Spot lewat REST, polling murni (tanpa user data stream):
//   GET    /api/v3/account   -> saldo free per asset
//   GET    /api/v3/depth     -> order book (asks dibalik: best ask di akhir)
//   POST   /api/v3/order     -> LIMIT GTC
//   DELETE /api/v3/order     -> cancel
//   GET    /api/v3/order     -> status + executedQty
// Endpoint signed pakai HMAC-SHA256 atas query string.
//
use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use tracing::{debug, error};

use crate::binance::{fmt_num, sign_query, timestamp_ms, AccountResp, DepthResp, OrderResp};
use crate::domain::{Balances, GatewayOrder, OrderBookSnapshot, OrderId, Side};
use crate::gateway::{GatewayError, TradeGateway};

pub struct BinanceGateway {
    http: reqwest::Client,
    rest_base: String,
    api_key: String,
    api_secret: String,
    recv_window: u64,
    symbol: String,
}

impl BinanceGateway {
    /// `symbol` in venue form, e.g. "BTCUSDT".
    pub fn new(rest_base: String, api_key: String, api_secret: String, recv_window: u64, symbol: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            rest_base: rest_base.trim_end_matches('/').to_string(),
            api_key,
            api_secret,
            recv_window,
            symbol,
        }
    }

    fn query(params: &[(&str, String)]) -> String {
        params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }

    async fn send<T: DeserializeOwned>(&self, method: Method, url: String) -> Result<T, GatewayError> {
        let rsp = self
            .http
            .request(method, url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let status = rsp.status();
        let body = rsp.text().await.map_err(|e| GatewayError::Transport(e.to_string()))?;
        if !status.is_success() {
            error!(%status, %body, "binance request failed");
            return Err(GatewayError::Api { status: status.as_u16(), body });
        }
        serde_json::from_str(&body).map_err(|e| GatewayError::Decode(format!("{e}: {body}")))
    }

    async fn signed<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        mut params: Vec<(&str, String)>,
    ) -> Result<T, GatewayError> {
        params.push(("timestamp", timestamp_ms().to_string()));
        params.push(("recvWindow", self.recv_window.to_string()));
        let query = Self::query(&params);
        let sig = sign_query(&self.api_secret, &query).map_err(|e| GatewayError::Rejected(format!("signing: {e}")))?;
        let url = format!("{}{}?{}&signature={}", self.rest_base, path, query, sig);
        self.send(method, url).await
    }

    async fn place(&self, side: Side, price: f64, qty: f64) -> Result<OrderId, GatewayError> {
        let side_str = match side {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        };
        let params = vec![
            ("symbol", self.symbol.clone()),
            ("side", side_str.to_string()),
            ("type", "LIMIT".to_string()),
            ("timeInForce", "GTC".to_string()),
            ("quantity", fmt_num(qty)),
            ("price", fmt_num(price)),
        ];
        let o: OrderResp = self.signed(Method::POST, "/api/v3/order", params).await?;
        debug!(order_id = o.order_id, %side, price, qty, status = %o.status, "binance order accepted");
        Ok(OrderId::new(o.order_id.to_string()))
    }
}

#[async_trait]
impl TradeGateway for BinanceGateway {
    fn name(&self) -> &str { "binance" }

    async fn get_account(&self) -> Result<Balances, GatewayError> {
        let acc: AccountResp = self.signed(Method::GET, "/api/v3/account", Vec::new()).await?;
        let available = acc
            .balances
            .into_iter()
            .map(|b| (b.asset.to_ascii_lowercase(), b.free.parse::<f64>().unwrap_or(0.0)))
            .collect();
        Ok(Balances { available })
    }

    async fn get_order_book(&self) -> Result<OrderBookSnapshot, GatewayError> {
        let url = format!("{}/api/v3/depth?symbol={}&limit=20", self.rest_base, self.symbol);
        let depth: DepthResp = self.send(Method::GET, url).await?;
        Ok(depth.into_snapshot())
    }

    async fn buy(&self, price: f64, qty: f64) -> Result<OrderId, GatewayError> {
        self.place(Side::Buy, price, qty).await
    }

    async fn sell(&self, price: f64, qty: f64) -> Result<OrderId, GatewayError> {
        self.place(Side::Sell, price, qty).await
    }

    async fn cancel_order(&self, id: &OrderId) -> Result<(), GatewayError> {
        let params = vec![("symbol", self.symbol.clone()), ("orderId", id.to_string())];
        let _: OrderResp = self.signed(Method::DELETE, "/api/v3/order", params).await?;
        Ok(())
    }

    async fn get_order(&self, id: &OrderId) -> Result<GatewayOrder, GatewayError> {
        let params = vec![("symbol", self.symbol.clone()), ("orderId", id.to_string())];
        let o: OrderResp = self.signed(Method::GET, "/api/v3/order", params).await?;
        let side = match o.side.as_str() {
            "BUY" => Side::Buy,
            "SELL" => Side::Sell,
            other => return Err(GatewayError::Decode(format!("unknown side {other}"))),
        };
        Ok(GatewayOrder {
            id: id.clone(),
            side,
            price: o.price(),
            amount: o.orig_qty(),
            deal_amount: o.executed_qty(),
        })
    }
}

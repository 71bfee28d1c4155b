// ===============================
// src/placement.rs (order placement facade)
// ===============================
//
// Buy():  limit = best bid + slippage, qty = TRADE_AMOUNT (dipotong ke saldo quote)
// Sell(): limit = best ask - slippage (disciple floor kecuali stop-loss),
//         qty = min(TRADE_AMOUNT, saldo base)
//
// ENABLE_TRADING != "1" -> id simulasi (negatif), TANPA panggilan mutasi ke gateway,
// tapi bookkeeping (pending set + trade state) tetap sama persis dengan jalur live.
//
use thiserror::Error;
use tracing::{info, warn};

use crate::domain::{Event, OrderId, Side};
use crate::gateway::GatewayError;
use crate::metrics::ORDERS;
use crate::positions::PrevTrade;
use crate::trader::Trader;

/// Below this available base balance there is nothing to sell.
pub const SELL_DUST: f64 = 0.01;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    Live(OrderId),
    Simulated(OrderId),
}

impl Placement {
    pub fn id(&self) -> &OrderId {
        match self {
            Placement::Live(id) | Placement::Simulated(id) => id,
        }
    }

    pub fn is_simulated(&self) -> bool { matches!(self, Placement::Simulated(_)) }
}

#[derive(Debug, Error)]
pub enum PlaceError {
    #[error("previous action was already {0}")]
    Repeated(Side),
    #[error("order book unavailable")]
    NoQuote,
    #[error("account unavailable: {0}")]
    Account(GatewayError),
    #[error("trade amount is not a positive number")]
    InvalidAmount,
    #[error("not enough {asset}: can afford {affordable:.6}, min lot {min_lot}")]
    InsufficientQuote { asset: String, affordable: f64, min_lot: f64 },
    #[error("not enough {asset} to sell: {available:.6}")]
    NoBase { asset: String, available: f64 },
    #[error("order submission failed: {0}")]
    Gateway(GatewayError),
}

impl Trader {
    /// Place a buy unless the previous action already was a buy.
    pub async fn buy(&mut self) -> Result<Placement, PlaceError> {
        if self.state.trade.prev == PrevTrade::Buy {
            return Err(PlaceError::Repeated(Side::Buy));
        }

        // stop-loss flag hanya berlaku sampai buy berikutnya
        self.state.trade.stoploss_armed = false;

        let book = self.order_book_with_retry().await.ok_or(PlaceError::NoQuote)?;
        let best_bid = book.best_bid().ok_or(PlaceError::NoQuote)?;
        let price = best_bid + self.settings.slippage;

        let mut qty = self.settings.trade_amount;
        if !(qty > 0.0) {
            warn!(qty, "amount is not a positive number");
            return Err(PlaceError::InvalidAmount);
        }

        let balances = self.gateway.get_account().await.map_err(|e| {
            warn!(?e, "GetAccount failed");
            PlaceError::Account(e)
        })?;
        let quote = self.settings.instrument.quote.clone();
        let available = balances.available(&quote);
        if available < price * qty {
            let min_lot = self.settings.instrument.min_lot();
            qty = available / price;
            if qty < min_lot {
                let msg = format!("buy limit {price:.4}: not enough {quote} (available {available:.4})");
                warn!(%msg);
                self.notify(msg);
                ORDERS.with_label_values(&["buy", "insufficient"]).inc();
                return Err(PlaceError::InsufficientQuote { asset: quote, affordable: qty, min_lot });
            }
        }

        self.submit(Side::Buy, price, qty).await
    }

    /// Place a sell unless the previous action already was a sell.
    pub async fn sell(&mut self) -> Result<Placement, PlaceError> {
        if self.state.trade.prev == PrevTrade::Sell {
            return Err(PlaceError::Repeated(Side::Sell));
        }

        let book = self.order_book_with_retry().await.ok_or(PlaceError::NoQuote)?;
        let best_ask = book.best_ask().ok_or(PlaceError::NoQuote)?;
        let price = self.sell_price(best_ask);

        let balances = self.gateway.get_account().await.map_err(|e| {
            warn!(?e, "GetAccount failed");
            PlaceError::Account(e)
        })?;
        let base = self.settings.instrument.base.clone();
        let available = balances.available(&base);
        if available < SELL_DUST {
            // tidak ada yang bisa dijual: anggap posisi sudah keluar
            let msg = format!("sell limit {price:.4}: not enough {base} to sell ({available:.6})");
            warn!(%msg);
            self.state.trade.mark_sold();
            self.commit();
            self.notify(msg);
            ORDERS.with_label_values(&["sell", "no_base"]).inc();
            return Err(PlaceError::NoBase { asset: base, available });
        }

        let amount = self.settings.trade_amount;
        if !(amount > 0.0) {
            warn!(amount, "amount is not a positive number");
            return Err(PlaceError::InvalidAmount);
        }
        let qty = amount.min(available);

        self.submit(Side::Sell, price, qty).await
    }

    /// Sell limit from the best ask, floored in disciple mode unless stop-loss is armed.
    pub(crate) fn sell_price(&self, best_ask: f64) -> f64 {
        let mut price = best_ask - self.settings.slippage;
        let trade = &self.state.trade;
        if !trade.stoploss_armed && self.settings.disciple_mode && price < trade.prev_buy_price {
            price = trade.prev_buy_price + self.settings.disciple_value;
        }
        price
    }

    /// Submit (or simulate) and start tracking. Shared by Buy/Sell and the
    /// reconciliation resubmits.
    pub(crate) async fn submit(&mut self, side: Side, price: f64, qty: f64) -> Result<Placement, PlaceError> {
        let live = self.settings.enable_trading;
        let mut msg = format!("{side} limit {price:.4} qty {qty:.6}");

        let placement = if live {
            let res = match side {
                Side::Buy => self.gateway.buy(price, qty).await,
                Side::Sell => self.gateway.sell(price, qty).await,
            };
            match res {
                Ok(id) => Placement::Live(id),
                Err(e) => {
                    msg.push_str(" [submit failed]");
                    warn!(?e, %msg);
                    self.notify(msg);
                    ORDERS.with_label_values(&[side.as_str(), "failed"]).inc();
                    return Err(PlaceError::Gateway(e));
                }
            }
        } else {
            Placement::Simulated(self.state.next_simulated_id())
        };

        let now = self.now();
        let id = placement.id().clone();
        let seq = self.state.track(id.clone(), side, price, qty, now);
        match side {
            Side::Buy => self.state.trade.mark_bought(price),
            Side::Sell => self.state.trade.mark_sold(),
        }
        self.commit();

        if placement.is_simulated() {
            msg.push_str(" [simulated]");
            ORDERS.with_label_values(&[side.as_str(), "simulated"]).inc();
        } else {
            msg.push_str(&format!(" [submitted {id}]"));
            ORDERS.with_label_values(&[side.as_str(), "live"]).inc();
        }
        info!(seq, order_id = %id, %msg, "order placed");
        self.record(Event::Submitted { seq, id, side, price, qty, simulated: placement.is_simulated() });
        self.notify(msg);

        Ok(placement)
    }
}

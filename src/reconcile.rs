// ===============================
// src/reconcile.rs (order reconciliation loop)
// ===============================
//
// Satu pass, urutan tetap:
//   1) recancel retry   (cancel yang dulu gagal)
//   2) resell retry     (sisa jual yang belum tersubmit)
//   3) pending buys     (full fill / tunggu / timeout -> fold partial + cancel)
//   4) pending sells    (inspect delay, full fill / timeout -> cancel + resubmit)
//
// Semua order diproses satu per satu, ada jeda antar panggilan mutasi ke gateway.
// Error gateway = transient: order dilewati untuk tick ini, dicoba lagi pass berikutnya.
//
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::domain::{Event, OrderId, Side};
use crate::metrics::{CANCELS, FILLS, RETRIES};
use crate::placement::{PlaceError, Placement, SELL_DUST};
use crate::retry::Backoff;
use crate::tracker::{RecancelJob, ResellJob, TrackedOrder};
use crate::trader::Trader;

/// Partial fills at or below this are noise and never folded.
pub const PARTIAL_DUST: f64 = 0.0001;

const FILL_EPS: f64 = 1e-9;

/// What one reconciliation pass did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    pub recanceled: usize,
    pub recancel_failed: usize,
    pub resold: usize,
    pub resell_failed: usize,
    pub buys_filled: usize,
    pub buys_canceled: usize,
    pub sells_filled: usize,
    pub sells_canceled: usize,
    pub resubmitted: usize,
    pub escalated: usize,
    /// Order book unavailable twice; remaining sells wait for the next pass.
    pub aborted_sell_pass: bool,
}

impl ReconcileReport {
    pub fn is_quiet(&self) -> bool { *self == Self::default() }
}

impl Trader {
    /// Run one full reconciliation pass and persist the result.
    pub async fn reconcile(&mut self) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        self.retry_recancels(&mut report).await;
        self.retry_resells(&mut report).await;
        self.reconcile_buys(&mut report).await;
        self.reconcile_sells(&mut report).await;

        self.commit();
        if !report.is_quiet() {
            info!(?report, "reconcile pass");
        }
        report
    }

    fn elapsed_since(&self, at: DateTime<Utc>) -> Duration {
        // jam mundur -> dianggap 0
        (self.now() - at).to_std().unwrap_or_default()
    }

    fn escalate(&self, kind: &str, detail: String) {
        error!(kind, %detail, "retry budget exhausted, needs operator");
        self.record(Event::Escalated { kind: kind.to_string(), detail: detail.clone() });
        self.notify(format!("[ESCALATED] {kind}: {detail}"));
    }

    // ---------- 1) recancel ----------

    async fn retry_recancels(&mut self, report: &mut ReconcileReport) {
        let now = self.now();
        for entry in self.state.recancel.due(now) {
            let job = entry.job;
            let res = self.gateway.cancel_order(&job.id).await;
            self.pause().await;

            match res {
                Ok(()) => {
                    self.state.recancel.complete(entry.id);
                    report.recanceled += 1;
                    CANCELS.with_label_values(&[job.side.as_str(), "recancel_ok"]).inc();
                    RETRIES.with_label_values(&["recancel", "ok"]).inc();
                    info!(order_id = %job.id, side = %job.side, attempts = entry.attempts + 1, "recancel ok");
                    self.record(Event::Retry {
                        kind: "recancel".into(),
                        id: Some(job.id.clone()),
                        ok: true,
                        attempts: entry.attempts + 1,
                    });
                    let remainder = self.settle_after_cancel(&job, "late").await;
                    if remainder >= SELL_DUST {
                        let now = self.now();
                        self.state.resell.push(ResellJob { qty: remainder }, now);
                        self.notify(format!("sell {} canceled late, {remainder:.6} queued for resell", job.id));
                    }
                }
                Err(e) => {
                    report.recancel_failed += 1;
                    CANCELS.with_label_values(&[job.side.as_str(), "recancel_failed"]).inc();
                    RETRIES.with_label_values(&["recancel", "failed"]).inc();
                    warn!(?e, order_id = %job.id, "recancel failed");
                    let at = self.now();
                    let policy = self.settings.retry;
                    let backoff = self.state.recancel.fail(entry.id, at, &policy);
                    self.record(Event::Retry {
                        kind: "recancel".into(),
                        id: Some(job.id.clone()),
                        ok: false,
                        attempts: entry.attempts + 1,
                    });
                    if let Some(Backoff::Escalated(n)) = backoff {
                        report.escalated += 1;
                        self.escalate("recancel", format!("{} order {} not canceled after {n} attempts", job.side, job.id));
                    }
                }
            }
        }
    }

    /// A cancel succeeded: poll once more and account for whatever filled
    /// beyond `job.accounted`. Returns the unsold sell remainder (0 for buys).
    async fn settle_after_cancel(&mut self, job: &RecancelJob, label: &str) -> f64 {
        let (filled, price) = match self.gateway.get_order(&job.id).await {
            Ok(o) => (o.deal_amount.min(job.requested), if o.price > 0.0 { o.price } else { job.price }),
            Err(e) => {
                warn!(?e, order_id = %job.id, last_filled = job.last_filled, "poll after cancel failed, using last known fill");
                (job.last_filled.max(job.accounted), job.price)
            }
        };
        let extra = filled - job.accounted;
        let now = self.now();

        match job.side {
            Side::Buy => {
                if extra > PARTIAL_DUST {
                    let avg = self.state.record_buy_fill(job.seq, &job.id, extra, price, now);
                    FILLS.with_label_values(&["buy", label]).inc();
                    self.filled_event(&job.id, Side::Buy, extra, price, avg);
                }
                0.0
            }
            Side::Sell => {
                if extra > FILL_EPS {
                    self.state.record_sell_fill(job.seq, &job.id, extra, price, now);
                    FILLS.with_label_values(&["sell", label]).inc();
                    let avg = self.state.position.avg_price;
                    self.filled_event(&job.id, Side::Sell, extra, price, avg);
                }
                (job.requested - filled).max(0.0)
            }
        }
    }

    // ---------- 2) resell ----------

    async fn retry_resells(&mut self, report: &mut ReconcileReport) {
        let now = self.now();
        for entry in self.state.resell.due(now) {
            let qty = entry.job.qty;
            match self.resubmit_sell(qty).await {
                Ok(p) => {
                    self.state.resell.complete(entry.id);
                    report.resold += 1;
                    RETRIES.with_label_values(&["resell", "ok"]).inc();
                    self.record(Event::Retry {
                        kind: "resell".into(),
                        id: Some(p.id().clone()),
                        ok: true,
                        attempts: entry.attempts + 1,
                    });
                }
                Err(e) => {
                    report.resell_failed += 1;
                    RETRIES.with_label_values(&["resell", "failed"]).inc();
                    warn!(%e, qty, "resell failed");
                    let at = self.now();
                    let policy = self.settings.retry;
                    let backoff = self.state.resell.fail(entry.id, at, &policy);
                    self.record(Event::Retry { kind: "resell".into(), id: None, ok: false, attempts: entry.attempts + 1 });
                    if let Some(Backoff::Escalated(n)) = backoff {
                        report.escalated += 1;
                        self.escalate("resell", format!("{qty:.6} unsold after {n} attempts"));
                    }
                }
            }
        }
    }

    /// New sell just inside the fresh best ask. Skips the `sell()` repeat guard:
    /// this continues an exit already under way.
    async fn resubmit_sell(&mut self, qty: f64) -> Result<Placement, PlaceError> {
        let book = self.order_book_with_retry().await.ok_or(PlaceError::NoQuote)?;
        let best_ask = book.best_ask().ok_or(PlaceError::NoQuote)?;
        self.resubmit_sell_at(best_ask - self.settings.price_tick, qty).await
    }

    /// Sell at most what the account still holds.
    async fn resubmit_sell_at(&mut self, price: f64, qty: f64) -> Result<Placement, PlaceError> {
        let balances = self.gateway.get_account().await.map_err(PlaceError::Account)?;
        let base = self.settings.instrument.base.clone();
        let available = balances.available(&base);
        let capped = qty.min(available);
        if capped < SELL_DUST {
            return Err(PlaceError::NoBase { asset: base, available });
        }
        if capped < qty {
            warn!(qty, available, "resell capped to available balance");
        }
        self.submit(Side::Sell, price, capped).await
    }

    fn filled_event(&self, id: &OrderId, side: Side, qty: f64, price: f64, avg_entry: f64) {
        self.record(Event::Filled {
            id: id.clone(),
            side,
            qty,
            price,
            avg_entry,
            position: self.state.position.qty,
        });
    }

    // ---------- 3) buys ----------

    async fn reconcile_buys(&mut self, report: &mut ReconcileReport) {
        let orders: Vec<TrackedOrder> = self.state.pending_buys.values().cloned().collect();
        for order in orders {
            let now = self.now();

            if order.id.is_simulated() {
                self.state.untrack(Side::Buy, order.seq);
                let avg = self.state.record_buy_fill(order.seq, &order.id, order.qty, order.price, now);
                FILLS.with_label_values(&["buy", "simulated"]).inc();
                self.filled_event(&order.id, Side::Buy, order.qty, order.price, avg);
                report.buys_filled += 1;
                continue;
            }

            let polled = match self.gateway.get_order(&order.id).await {
                Ok(o) => o,
                Err(e) => {
                    debug!(?e, order_id = %order.id, "buy poll failed, next pass");
                    continue;
                }
            };
            let price = if polled.price > 0.0 { polled.price } else { order.price };
            let filled = polled.deal_amount;

            if filled >= order.qty - FILL_EPS {
                self.state.untrack(Side::Buy, order.seq);
                let avg = self.state.record_buy_fill(order.seq, &order.id, filled, price, now);
                FILLS.with_label_values(&["buy", "full"]).inc();
                self.filled_event(&order.id, Side::Buy, filled, price, avg);
                self.notify(format!("buy {} filled {filled:.6} @ {price:.4}, avg entry {avg:.4}", order.id));
                report.buys_filled += 1;
                continue;
            }

            if self.elapsed_since(order.submitted_at) <= self.settings.buy_timeout {
                continue;
            }

            // timeout: lepas dari pending + fold partial dulu, baru cancel
            self.state.untrack(Side::Buy, order.seq);
            let mut accounted = 0.0;
            if filled > PARTIAL_DUST {
                let avg = self.state.record_buy_fill(order.seq, &order.id, filled, price, now);
                FILLS.with_label_values(&["buy", "partial"]).inc();
                self.filled_event(&order.id, Side::Buy, filled, price, avg);
                accounted = filled;
            }

            let res = self.gateway.cancel_order(&order.id).await;
            self.pause().await;
            let job = RecancelJob {
                seq: order.seq,
                id: order.id.clone(),
                side: Side::Buy,
                price: order.price,
                requested: order.qty,
                accounted,
                last_filled: filled,
            };
            match res {
                Ok(()) => {
                    report.buys_canceled += 1;
                    CANCELS.with_label_values(&["buy", "ok"]).inc();
                    self.record(Event::Canceled { id: order.id.clone(), side: Side::Buy, ok: true });
                    // fill bisa masuk di antara poll dan cancel
                    self.settle_after_cancel(&job, "late").await;
                    self.notify(format!("buy {} timed out, canceled (position {:.6})", order.id, self.state.position.qty));
                }
                Err(e) => {
                    CANCELS.with_label_values(&["buy", "failed"]).inc();
                    warn!(?e, order_id = %order.id, "buy cancel failed, queued for recancel");
                    self.record(Event::Canceled { id: order.id.clone(), side: Side::Buy, ok: false });
                    self.state.recancel.push(job, now);
                    self.notify(format!("buy {} cancel failed, will retry", order.id));
                }
            }
        }
    }

    // ---------- 4) sells ----------

    async fn reconcile_sells(&mut self, report: &mut ReconcileReport) {
        let orders: Vec<TrackedOrder> = self.state.pending_sells.values().cloned().collect();
        for order in orders {
            let elapsed = self.elapsed_since(order.submitted_at);
            if elapsed <= self.settings.sell_inspect_delay {
                continue;
            }
            let now = self.now();

            if order.id.is_simulated() {
                self.state.untrack(Side::Sell, order.seq);
                self.state.record_sell_fill(order.seq, &order.id, order.qty, order.price, now);
                FILLS.with_label_values(&["sell", "simulated"]).inc();
                self.filled_event(&order.id, Side::Sell, order.qty, order.price, self.state.position.avg_price);
                report.sells_filled += 1;
                continue;
            }

            let polled = match self.gateway.get_order(&order.id).await {
                Ok(o) => o,
                Err(e) => {
                    debug!(?e, order_id = %order.id, "sell poll failed, next pass");
                    continue;
                }
            };
            let price = if polled.price > 0.0 { polled.price } else { order.price };
            let filled = polled.deal_amount;

            if filled >= order.qty - FILL_EPS {
                self.state.untrack(Side::Sell, order.seq);
                self.state.record_sell_fill(order.seq, &order.id, filled, price, now);
                FILLS.with_label_values(&["sell", "full"]).inc();
                self.filled_event(&order.id, Side::Sell, filled, price, self.state.position.avg_price);
                self.notify(format!("sell {} filled {filled:.6} @ {price:.4}", order.id));
                report.sells_filled += 1;
                continue;
            }

            if elapsed <= self.settings.sell_timeout {
                continue;
            }

            // harga baru dibutuhkan untuk resubmit; gagal 2x -> stop pass sell
            let Some(best_ask) = self.order_book_with_retry().await.and_then(|b| b.best_ask()) else {
                warn!("orderBook unavailable, sell reconciliation aborted for this pass");
                report.aborted_sell_pass = true;
                return;
            };

            let res = self.gateway.cancel_order(&order.id).await;
            self.pause().await;
            self.state.untrack(Side::Sell, order.seq);

            // fill terakhir yang terlihat; posisi belum dikurangi
            let job = RecancelJob {
                seq: order.seq,
                id: order.id.clone(),
                side: Side::Sell,
                price,
                requested: order.qty,
                accounted: 0.0,
                last_filled: filled,
            };
            match res {
                Ok(()) => {
                    report.sells_canceled += 1;
                    CANCELS.with_label_values(&["sell", "ok"]).inc();
                    self.record(Event::Canceled { id: order.id.clone(), side: Side::Sell, ok: true });

                    let remainder = self.settle_after_cancel(&job, "partial").await;
                    if remainder < SELL_DUST {
                        continue;
                    }
                    let resell_price = best_ask - self.settings.price_tick;
                    match self.resubmit_sell_at(resell_price, remainder).await {
                        Ok(_) => report.resubmitted += 1,
                        Err(e) => {
                            warn!(%e, remainder, "sell resubmit failed, queued for resell");
                            self.state.resell.push(ResellJob { qty: remainder }, now);
                            self.notify(format!("sell resubmit of {remainder:.6} failed, will retry"));
                        }
                    }
                }
                Err(e) => {
                    CANCELS.with_label_values(&["sell", "failed"]).inc();
                    warn!(?e, order_id = %order.id, "sell cancel failed, queued for recancel");
                    self.record(Event::Canceled { id: order.id.clone(), side: Side::Sell, ok: false });
                    self.state.recancel.push(job, now);
                    self.notify(format!("sell {} cancel failed, will retry", order.id));
                }
            }
        }
    }
}

/// Reconciliation timer, independent of bar arrival.
pub async fn run(trader: Arc<Mutex<Trader>>, every: Duration) {
    let mut tick = interval(every.max(Duration::from_millis(100)));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(every_secs = every.as_secs_f64(), "reconcile loop started");
    loop {
        tick.tick().await;
        let mut t = trader.lock().await;
        t.reconcile().await;
    }
}

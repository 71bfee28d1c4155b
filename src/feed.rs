// ===============================
// src/feed.rs
// ===============================
//
// Price-bar adapters:
// - run_mock      : random-walk 1-period bars (satu bar per `every`)
// - run_binance   : Binance WS kline_1m, hanya kline yang sudah close
//                   (Sandbox & Mainnet, WS base URL dari config)
//
// Bar dikirim ke dispatcher lewat mpsc; kalau dispatcher sudah berhenti, feed ikut berhenti.
//
use chrono::Utc;
use futures_util::StreamExt; // for .next()
use rand::Rng;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_tungstenite::connect_async;
use tracing::{error, info, warn};
use url::Url;

use crate::binance::parse_closed_kline;
use crate::domain::PriceBar;
use crate::metrics::BARS;

/// Random-walk bar generator around `start`.
pub async fn run_mock(bar_tx: mpsc::Sender<PriceBar>, start: f64, every: Duration) {
    let mut close = start.max(1.0);
    loop {
        let bar = {
            // jangan simpan ThreadRng melewati .await
            let mut rng = rand::thread_rng();
            let open = close;
            close = (open + rng.gen_range(-0.5..=0.5) * start * 0.001).max(1.0);
            let wick = rng.gen_range(0.0..=0.3) * start * 0.001;
            PriceBar {
                ts: Utc::now(),
                open,
                high: open.max(close) + wick,
                low: open.min(close) - wick,
                close,
                volume: rng.gen_range(0.2..=5.0),
            }
        };
        if bar_tx.send(bar).await.is_err() {
            info!("bar receiver closed, mock feed stopped");
            return;
        }
        BARS.inc();
        sleep(every).await;
    }
}

/// Binance WS closed 1m klines for `symbol` (e.g. "BTCUSDT").
///
/// - `ws_base` dari config:
///     * Sandbox: wss://testnet.binance.vision/ws
///     * Mainnet: wss://stream.binance.com:9443/ws
pub async fn run_binance(bar_tx: mpsc::Sender<PriceBar>, symbol: String, ws_base: String) {
    let topic = format!("{}@kline_1m", symbol.to_lowercase());
    let ws_url = format!("{}/{}", ws_base.trim_end_matches('/'), topic);

    let mut attempt: u32 = 0;
    loop {
        let url = match Url::parse(&ws_url) {
            Ok(u) => u,
            Err(e) => {
                error!(?e, %ws_url, "bad ws url");
                return;
            }
        };

        info!(%ws_url, "connecting binance kline stream");
        match connect_async(url).await {
            Ok((mut ws, _resp)) => {
                info!("connected to kline stream for {}", symbol);
                attempt = 0; // reset backoff

                while let Some(frame) = ws.next().await {
                    match frame {
                        Ok(m) if m.is_text() => {
                            let txt = match m.into_text() {
                                Ok(t) => t,
                                Err(e) => {
                                    warn!(?e, "failed to read text frame");
                                    continue;
                                }
                            };
                            let Some(bar) = parse_closed_kline(&txt) else { continue };
                            if bar_tx.send(bar).await.is_err() {
                                info!("bar receiver closed, binance feed stopped");
                                return;
                            }
                            BARS.inc();
                        }
                        Ok(_) => {
                            // ignore non-text frames
                        }
                        Err(e) => {
                            error!(?e, "ws read error");
                            break;
                        }
                    }
                }
                info!("kline stream disconnected, will reconnect…");
            }
            Err(e) => {
                error!(?e, "connect failed");
            }
        }

        // Exponential backoff + jitter
        attempt = attempt.saturating_add(1);
        let shift = attempt.min(6);                  // 0..=6
        let factor = 1u64 << shift;                  // 1,2,4,...,64
        let base_ms = 500u64.saturating_mul(factor); // 0.5s..32s
        let jitter = rand::thread_rng().gen_range(0..=250);
        sleep(Duration::from_millis(base_ms + jitter)).await;
    }
}

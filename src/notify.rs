// ===============================
// src/notify.rs
// ===============================
//
// Notifikasi human-readable (trade / warning), fire-and-forget:
// - `Notifier::notify` tidak pernah block dan tidak pernah gagal bagi pemanggil
//   (pakai try_send; kalau antrian penuh pesan dibuang + log).
// - Task `run` mengirim ke log dan, jika diset, ke webhook HTTP (NOTIFY_WEBHOOK_URL).
//
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::metrics::NOTIFY_DROPPED;

#[derive(Clone, Debug, Default)]
pub struct Notifier {
    tx: Option<mpsc::Sender<String>>,
}

impl Notifier {
    pub fn new(tx: mpsc::Sender<String>) -> Self { Self { tx: Some(tx) } }

    /// Notifier that drops everything (tests / headless runs).
    pub fn disabled() -> Self { Self { tx: None } }

    pub fn notify(&self, msg: impl Into<String>) {
        let Some(tx) = &self.tx else { return };
        if let Err(e) = tx.try_send(msg.into()) {
            NOTIFY_DROPPED.inc();
            warn!(err = %e, "notification dropped");
        }
    }
}

pub async fn run(mut rx: mpsc::Receiver<String>, webhook: Option<String>) {
    let http = reqwest::Client::new();
    while let Some(msg) = rx.recv().await {
        info!(%msg, "notify");
        let Some(url) = webhook.as_deref() else { continue };
        let body = serde_json::json!({ "text": msg });
        match http.post(url).json(&body).send().await {
            Ok(rsp) if rsp.status().is_success() => {}
            Ok(rsp) => warn!(status = %rsp.status(), "notify webhook rejected"),
            Err(e) => warn!(?e, "notify webhook failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn notify_never_blocks_when_full() {
        let (tx, mut rx) = mpsc::channel(1);
        let n = Notifier::new(tx);
        n.notify("one");
        n.notify("two"); // penuh -> dibuang
        assert_eq!(rx.recv().await.as_deref(), Some("one"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn disabled_is_noop() {
        Notifier::disabled().notify("ignored");
    }
}

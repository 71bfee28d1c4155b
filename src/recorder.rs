// ===============================
// src/recorder.rs
// ===============================
//
// Audit trail JSONL untuk setiap transisi state order:
// - Satu baris JSON per Event, ditambah timestamp rekam (`at`).
// - BufWriter, flush tiap 1s atau tiap 200 event.
// - Parent directory dibuat otomatis.
// - Gagal tulis -> reopen sekali, kalau tetap gagal event dibuang (audit saja,
//   bukan sumber kebenaran).
//
// ENV: `RECORD_FILE=/path/to/events.jsonl`.
//
use std::path::Path;

use chrono::Utc;
use serde::Serialize;
use tokio::{
    fs::{self, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
    sync::mpsc,
    time::{interval, Duration, MissedTickBehavior},
};
use tracing::{error, info};

use crate::domain::Event;

const FLUSH_EVERY_N_EVENTS: u32 = 200;

#[derive(Serialize)]
struct Line<'a> {
    at: chrono::DateTime<Utc>,
    #[serde(flatten)]
    event: &'a Event,
}

async fn open_writer(path: &str) -> std::io::Result<BufWriter<fs::File>> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }
    let file = OpenOptions::new().create(true).append(true).open(path).await?;
    Ok(BufWriter::new(file))
}

fn encode(ev: &Event) -> Option<String> {
    match serde_json::to_string(&Line { at: Utc::now(), event: ev }) {
        Ok(mut s) => {
            s.push('\n');
            Some(s)
        }
        Err(e) => {
            error!(?e, "recorder: serialize error, skip event");
            None
        }
    }
}

pub async fn run(mut rx: mpsc::Receiver<Event>, path: String) {
    let mut writer = match open_writer(&path).await {
        Ok(w) => w,
        Err(e) => {
            error!(?e, %path, "recorder: open failed, recording disabled");
            return;
        }
    };
    info!(%path, "recorder: started");

    let mut tick = interval(Duration::from_secs(1));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut since_last_flush: u32 = 0;

    loop {
        tokio::select! {
            maybe_ev = rx.recv() => {
                let Some(ev) = maybe_ev else {
                    let _ = writer.flush().await;
                    info!("recorder: channel closed, stopped");
                    break;
                };
                let Some(line) = encode(&ev) else { continue };

                if let Err(e) = writer.write_all(line.as_bytes()).await {
                    error!(?e, "recorder: write failed, attempting reopen");
                    match open_writer(&path).await {
                        Ok(w) => writer = w,
                        Err(e2) => {
                            error!(?e2, "recorder: reopen failed, drop event");
                            continue;
                        }
                    }
                    if let Err(e2) = writer.write_all(line.as_bytes()).await {
                        error!(?e2, "recorder: write failed again after reopen, drop event");
                        continue;
                    }
                }

                since_last_flush += 1;
                if since_last_flush >= FLUSH_EVERY_N_EVENTS {
                    let _ = writer.flush().await;
                    since_last_flush = 0;
                }
            }

            _ = tick.tick() => {
                let _ = writer.flush().await;
                since_last_flush = 0;
            }
        }
    }
}

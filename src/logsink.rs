//! Fire-and-forget access-log sink.
//!
//! Producers call [`LogSink::log`] from protocol actions and never block on
//! log delivery: records go through a bounded channel sized by
//! `log_buffers`, and overflow degrades internally by counting dropped
//! records instead of propagating backpressure. A single writer task drains
//! the channel to the log file and flushes on an interval.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::fs::OpenOptions;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;

const FLUSH_INTERVAL: Duration = Duration::from_millis(100);

struct LogRecord {
    timestamp: SystemTime,
    message: String,
}

#[derive(Clone)]
pub struct LogSink {
    tx: mpsc::Sender<LogRecord>,
    dropped: Arc<AtomicU64>,
}

impl LogSink {
    /// Open the log file and spawn the writer task.
    pub async fn open(path: &str, log_buffers: usize) -> std::io::Result<LogSink> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        let (tx, rx) = mpsc::channel(log_buffers.max(1));
        tokio::spawn(writer_task(BufWriter::new(file), rx));
        Ok(LogSink { tx, dropped: Arc::new(AtomicU64::new(0)) })
    }

    /// Queue one record. Best-effort: a full channel drops the record and
    /// bumps the overflow counter.
    pub fn log(&self, timestamp: SystemTime, message: &str) {
        let record = LogRecord { timestamp, message: message.to_string() };
        if self.tx.try_send(record).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Records lost to channel overflow since the sink was opened.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

async fn writer_task(
    mut out: BufWriter<tokio::fs::File>,
    mut rx: mpsc::Receiver<LogRecord>,
) {
    let mut flush = tokio::time::interval(FLUSH_INTERVAL);
    flush.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            record = rx.recv() => {
                match record {
                    Some(record) => {
                        let ts = record
                            .timestamp
                            .duration_since(UNIX_EPOCH)
                            .unwrap_or_default()
                            .as_secs();
                        let line = format!("{ts} {}\n", record.message);
                        if let Err(e) = out.write_all(line.as_bytes()).await {
                            tracing::warn!("access log write failed: {e}");
                        }
                    }
                    None => break,
                }
            }
            _ = flush.tick() => {
                if let Err(e) = out.flush().await {
                    tracing::warn!("access log flush failed: {e}");
                }
            }
        }
    }
    let _ = out.flush().await;
}

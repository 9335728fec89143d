// src/history.rs - Time/size batched history writer
use crate::error::Result;
use crate::repository::{with_timeout, HistoryRepository};
use crate::value::Value;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// One buffered history sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Point the sample belongs to
    pub point_id: String,
    /// Accepted value
    pub value: Value,
    /// When the value was observed
    pub timestamp: DateTime<Utc>,
}

/// Tuning for the history batcher
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Buffer size that forces an immediate flush
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Seconds between timed flushes
    #[serde(default = "default_flush_interval")]
    pub flush_interval_secs: u64,

    /// Hard cap on buffered records; overflow drops the oldest
    #[serde(default = "default_max_buffered")]
    pub max_buffered: usize,

    /// Consecutive flush failures tolerated before a batch is dropped
    #[serde(default = "default_flush_retry_limit")]
    pub flush_retry_limit: u32,
}

fn default_batch_size() -> usize {
    50
}

fn default_flush_interval() -> u64 {
    30
}

fn default_max_buffered() -> usize {
    5000
}

fn default_flush_retry_limit() -> u32 {
    3
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            flush_interval_secs: default_flush_interval(),
            max_buffered: default_max_buffered(),
            flush_retry_limit: default_flush_retry_limit(),
        }
    }
}

struct BatcherState {
    buffer: VecDeque<HistoryRecord>,
    consecutive_failures: u32,
    last_flush: Instant,
}

/// Accumulates accepted values and flushes them in batches
///
/// A flush happens when the buffer reaches `batch_size` or when
/// `flush_interval_secs` have passed since the last flush, whichever comes
/// first. Append and flush share one lock, so the timer can never flush a
/// half-appended batch. A failed batch is re-queued for the next cycle until
/// `flush_retry_limit` consecutive failures, then dropped.
pub struct HistoryBatcher {
    state: tokio::sync::Mutex<BatcherState>,
    repository: Arc<dyn HistoryRepository>,
    config: HistoryConfig,
    timeout: Duration,
    shutdown_tx: parking_lot::Mutex<Option<mpsc::Sender<()>>>,
    task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl HistoryBatcher {
    /// Create a batcher over the given history repository
    pub fn new(
        config: HistoryConfig,
        repository: Arc<dyn HistoryRepository>,
        timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: tokio::sync::Mutex::new(BatcherState {
                buffer: VecDeque::with_capacity(config.batch_size),
                consecutive_failures: 0,
                last_flush: Instant::now(),
            }),
            repository,
            config,
            timeout,
            shutdown_tx: parking_lot::Mutex::new(None),
            task: parking_lot::Mutex::new(None),
        })
    }

    /// Start the background flush timer
    pub fn spawn(self: &Arc<Self>) {
        let (tx, rx) = mpsc::channel(1);
        *self.shutdown_tx.lock() = Some(tx);
        let batcher = Arc::clone(self);
        let handle = tokio::spawn(async move { batcher.run(rx).await });
        *self.task.lock() = Some(handle);
        info!(
            "history batcher started, batch size {}, flush interval {}s",
            self.config.batch_size, self.config.flush_interval_secs
        );
    }

    async fn run(&self, mut shutdown_rx: mpsc::Receiver<()>) {
        let period = Duration::from_secs(self.config.flush_interval_secs);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!("history batcher shutdown requested");
                    if let Err(e) = self.flush().await {
                        error!("final history flush failed: {}", e);
                    }
                    break;
                }

                _ = ticker.tick() => {
                    let mut state = self.state.lock().await;
                    // A size-triggered flush resets the clock for the timer.
                    if state.last_flush.elapsed() >= period {
                        if let Err(e) = self.flush_locked(&mut state).await {
                            warn!("timed history flush failed: {}", e);
                        }
                    }
                }
            }
        }
    }

    /// Append an accepted value to the buffer
    pub async fn append(&self, record: HistoryRecord) -> Result<()> {
        let mut state = self.state.lock().await;
        state.buffer.push_back(record);

        let over = state.buffer.len().saturating_sub(self.config.max_buffered);
        if over > 0 {
            state.buffer.drain(..over);
            warn!("history buffer full, dropped {} oldest records", over);
        }

        if state.buffer.len() >= self.config.batch_size {
            self.flush_locked(&mut state).await?;
        }
        Ok(())
    }

    /// Flush all buffered records now
    pub async fn flush(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.flush_locked(&mut state).await
    }

    async fn flush_locked(&self, state: &mut BatcherState) -> Result<()> {
        state.last_flush = Instant::now();
        if state.buffer.is_empty() {
            return Ok(());
        }

        let batch: Vec<HistoryRecord> = state.buffer.drain(..).collect();
        let result = with_timeout(
            "history batch write",
            self.timeout,
            self.repository.add_batch(&batch),
        )
        .await;

        match result {
            Ok(()) => {
                debug!("flushed {} history records", batch.len());
                state.consecutive_failures = 0;
                Ok(())
            }
            Err(e) => {
                state.consecutive_failures += 1;
                if state.consecutive_failures > self.config.flush_retry_limit {
                    error!(
                        "history flush failed {} times, dropping batch of {}: {}",
                        state.consecutive_failures,
                        batch.len(),
                        e
                    );
                    state.consecutive_failures = 0;
                } else {
                    warn!(
                        "history flush failed (attempt {}), re-queueing {} records: {}",
                        state.consecutive_failures,
                        batch.len(),
                        e
                    );
                    for record in batch.into_iter().rev() {
                        state.buffer.push_front(record);
                    }
                    let over = state.buffer.len().saturating_sub(self.config.max_buffered);
                    if over > 0 {
                        state.buffer.drain(..over);
                        warn!("history buffer full, dropped {} oldest records", over);
                    }
                }
                Err(e)
            }
        }
    }

    /// Stop the flush timer and perform one final flush
    pub async fn shutdown(&self) {
        let tx = self.shutdown_tx.lock().take();
        let handle = self.task.lock().take();
        match (tx, handle) {
            (Some(tx), Some(handle)) => {
                let _ = tx.send(()).await;
                if let Err(e) = handle.await {
                    error!("history batcher task failed: {}", e);
                }
            }
            _ => {
                if let Err(e) = self.flush().await {
                    error!("final history flush failed: {}", e);
                }
            }
        }
    }

    /// Number of records currently buffered
    pub async fn buffered(&self) -> usize {
        self.state.lock().await.buffer.len()
    }
}

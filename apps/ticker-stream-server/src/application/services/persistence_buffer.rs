//! Persistence Buffer
//!
//! Decouples the rate of inbound batches from the rate of store writes.
//!
//! Two write paths share one component:
//!
//! - [`PersistenceBuffer::persist`] writes a batch straight through (the hot
//!   path used in `immediate` mode).
//! - [`PersistenceBuffer::enqueue`] appends a batch to the pending
//!   collection; the periodic [`PersistenceBuffer::run`] loop drains it with
//!   one bulk write per tick.
//!
//! A flush swaps the pending collection out under the lock, so concurrent
//! enqueues land in a fresh collection. If the write fails the records go
//! back in front of anything enqueued meanwhile, and the next flush is
//! delayed with exponential backoff. After `max_attempts` consecutive
//! failures the records are handed to the dead-letter sink (or, with no
//! sink, logged as lost) so a persistent outage cannot grow memory without
//! bound.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{DeadLetterSink, StoreError, TickStore};
use crate::domain::tick::TickRecord;
use crate::infrastructure::metrics;

// =============================================================================
// Configuration
// =============================================================================

/// How each ingested batch reaches the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PersistenceMode {
    /// Write every batch synchronously before publishing it.
    #[default]
    Immediate,
    /// Append every batch to the pending buffer; the flush loop writes it.
    Buffered,
}

impl PersistenceMode {
    /// Configuration spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::Buffered => "buffered",
        }
    }
}

impl fmt::Display for PersistenceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PersistenceMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "immediate" => Ok(Self::Immediate),
            "buffered" => Ok(Self::Buffered),
            other => Err(format!("unknown persistence mode: {other}")),
        }
    }
}

/// Flush loop tuning.
#[derive(Debug, Clone, Copy)]
pub struct BufferConfig {
    /// Time between flushes while healthy.
    pub flush_interval: Duration,
    /// Maximum records held in the pending collection.
    pub max_pending: usize,
    /// Consecutive failed flushes before records are dead-lettered.
    pub max_attempts: u32,
    /// First retry delay after a failed flush.
    pub backoff_initial: Duration,
    /// Retry delay ceiling.
    pub backoff_max: Duration,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(1),
            max_pending: 100_000,
            max_attempts: 5,
            backoff_initial: Duration::from_secs(1),
            backoff_max: Duration::from_secs(30),
        }
    }
}

impl BufferConfig {
    /// Delay before the flush following `attempt` consecutive failures.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.backoff_initial
            .saturating_mul(1 << exp)
            .min(self.backoff_max)
    }
}

// =============================================================================
// Errors and Outcomes
// =============================================================================

/// Persistence failures that abort an ingested batch.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// The store rejected the write.
    #[error("tick write failed: {0}")]
    Write(#[from] StoreError),

    /// Accepting the batch would exceed the pending cap.
    #[error("pending buffer full: {pending} pending + {incoming} incoming > {capacity}")]
    BufferFull {
        /// Records already pending.
        pending: usize,
        /// Records in the rejected batch.
        incoming: usize,
        /// Configured cap.
        capacity: usize,
    },
}

/// Result of one flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was pending.
    Idle,
    /// Records written to the store.
    Flushed(usize),
    /// The write failed; records are pending again.
    Failed {
        /// Records put back.
        records: usize,
        /// Consecutive failures so far.
        attempt: u32,
    },
    /// Records moved to the dead-letter sink after repeated failures.
    DeadLettered(usize),
    /// Records lost: no dead-letter sink, or the sink failed too.
    Dropped(usize),
}

// =============================================================================
// Persistence Buffer
// =============================================================================

/// Batched writer in front of a [`TickStore`].
pub struct PersistenceBuffer {
    store: Arc<dyn TickStore>,
    dead_letter: Option<Arc<dyn DeadLetterSink>>,
    pending: Mutex<Vec<TickRecord>>,
    consecutive_failures: tokio::sync::Mutex<u32>,
    config: BufferConfig,
}

impl fmt::Debug for PersistenceBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistenceBuffer")
            .field("pending", &self.pending_len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PersistenceBuffer {
    /// Create a buffer writing to `store`.
    #[must_use]
    pub fn new(store: Arc<dyn TickStore>, config: BufferConfig) -> Self {
        Self {
            store,
            dead_letter: None,
            pending: Mutex::new(Vec::new()),
            consecutive_failures: tokio::sync::Mutex::new(0),
            config,
        }
    }

    /// Attach a dead-letter sink for records that repeatedly fail to flush.
    #[must_use]
    pub fn with_dead_letter(mut self, sink: Arc<dyn DeadLetterSink>) -> Self {
        self.dead_letter = Some(sink);
        self
    }

    /// Write a batch straight to the store.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::Write`] if the store rejects the batch;
    /// nothing from the batch is stored in that case.
    pub async fn persist(&self, records: &[TickRecord]) -> Result<usize, PersistenceError> {
        Ok(self.store.insert_ticks(records).await?)
    }

    /// Append a batch to the pending collection as one unit.
    ///
    /// Returns the number of records pending afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::BufferFull`] if the batch does not fit;
    /// none of its records are appended in that case.
    pub fn enqueue(&self, records: Vec<TickRecord>) -> Result<usize, PersistenceError> {
        let len = {
            let mut pending = self.pending.lock();
            if pending.len() + records.len() > self.config.max_pending {
                return Err(PersistenceError::BufferFull {
                    pending: pending.len(),
                    incoming: records.len(),
                    capacity: self.config.max_pending,
                });
            }
            pending.extend(records);
            pending.len()
        };
        metrics::set_pending_records(len);
        Ok(len)
    }

    /// Number of records waiting for a flush.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Write everything pending in one bulk operation.
    ///
    /// Flushes are serialized. The pending collection is only cleared of the
    /// flushed records once the write has returned successfully.
    pub async fn flush(&self) -> FlushOutcome {
        let mut failures = self.consecutive_failures.lock().await;

        let batch = std::mem::take(&mut *self.pending.lock());
        if batch.is_empty() {
            return FlushOutcome::Idle;
        }

        let started = Instant::now();
        match self.store.insert_ticks(&batch).await {
            Ok(written) => {
                *failures = 0;
                metrics::record_flush(started.elapsed());
                metrics::set_pending_records(self.pending_len());
                tracing::debug!(
                    written,
                    elapsed_ms = started.elapsed().as_millis(),
                    "Flushed pending ticks"
                );
                FlushOutcome::Flushed(batch.len())
            }
            Err(err) => {
                *failures += 1;
                metrics::record_flush_failure();
                let attempt = *failures;

                if attempt >= self.config.max_attempts {
                    *failures = 0;
                    return self.give_up(batch, &err, attempt).await;
                }

                let records = batch.len();
                self.restore(batch);
                tracing::warn!(
                    error = %err,
                    records,
                    attempt,
                    max_attempts = self.config.max_attempts,
                    retry_in_ms = self.config.backoff(attempt).as_millis(),
                    "Flush failed, records kept for retry"
                );
                FlushOutcome::Failed { records, attempt }
            }
        }
    }

    fn restore(&self, batch: Vec<TickRecord>) {
        let len = {
            let mut pending = self.pending.lock();
            let newer = std::mem::replace(&mut *pending, batch);
            pending.extend(newer);
            pending.len()
        };
        metrics::set_pending_records(len);
    }

    async fn give_up(&self, batch: Vec<TickRecord>, err: &StoreError, attempt: u32) -> FlushOutcome {
        let count = batch.len();
        let reason = format!("flush failed {attempt} times: {err}");

        let Some(sink) = &self.dead_letter else {
            tracing::error!(
                records = count,
                error = %err,
                attempt,
                "Flush retries exhausted and no dead letter configured, records lost"
            );
            return FlushOutcome::Dropped(count);
        };

        match sink.write(&batch, &reason).await {
            Ok(()) => {
                metrics::record_dead_lettered(count);
                tracing::warn!(records = count, attempt, "Flush retries exhausted, records dead-lettered");
                FlushOutcome::DeadLettered(count)
            }
            Err(sink_err) => {
                tracing::error!(
                    records = count,
                    error = %err,
                    dead_letter_error = %sink_err,
                    "Dead letter write failed, records lost"
                );
                FlushOutcome::Dropped(count)
            }
        }
    }

    /// Flush on a fixed interval until `cancel` fires, then flush whatever
    /// is left before returning.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        tracing::info!(
            interval_ms = self.config.flush_interval.as_millis(),
            max_pending = self.config.max_pending,
            "Flush loop started"
        );

        let mut delay = self.config.flush_interval;
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {
                    delay = match self.flush().await {
                        FlushOutcome::Failed { attempt, .. } => self.config.backoff(attempt),
                        _ => self.config.flush_interval,
                    };
                }
            }
        }

        self.final_flush().await;
        tracing::info!("Flush loop stopped");
    }

    async fn final_flush(&self) {
        loop {
            match self.flush().await {
                FlushOutcome::Failed { attempt, .. } => {
                    tokio::time::sleep(self.config.backoff(attempt).min(Duration::from_secs(1)))
                        .await;
                }
                FlushOutcome::Flushed(count) => {
                    tracing::info!(records = count, "Final flush complete");
                    break;
                }
                FlushOutcome::Idle | FlushOutcome::DeadLettered(_) | FlushOutcome::Dropped(_) => {
                    break;
                }
            }
        }
    }
}

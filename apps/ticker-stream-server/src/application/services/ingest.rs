//! Tick Ingestion
//!
//! Turns one raw upstream frame into stored and broadcast records.
//!
//! Steps, in order, for every frame:
//!
//! 1. Decode the frame into normalized snapshots.
//! 2. Resolve every snapshot's trading pair to its coin id.
//! 3. Encode the identified batch into a subscriber frame.
//! 4. Persist the batch (`immediate`) or append it to the pending buffer
//!    (`buffered`).
//! 5. Publish the frame to every subscriber.
//!
//! A failure at any step abandons the whole frame: nothing from it is
//! published, and nothing from it is stored or enqueued unless step 4
//! already succeeded. Encoding runs before the write so a codec failure can
//! never leave a stored batch unpublished.

use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;

use super::identity_cache::{IdentityError, SymbolIdentityCache};
use super::persistence_buffer::{PersistenceBuffer, PersistenceError, PersistenceMode};
use crate::domain::tick::TickRecord;
use crate::infrastructure::binance::{DecodeError, decode_batch};
use crate::infrastructure::broadcast::BroadcastHub;
use crate::infrastructure::codec::{CodecError, CompressionCodec};
use crate::infrastructure::metrics::{self, BatchFailure};

/// Reasons an inbound frame was abandoned.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The frame could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// A trading pair could not be resolved to a coin id.
    #[error(transparent)]
    Identity(#[from] IdentityError),

    /// The batch could not be stored or enqueued.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    /// The batch could not be encoded for subscribers.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl IngestError {
    /// Metrics label for this failure.
    #[must_use]
    pub const fn kind(&self) -> BatchFailure {
        match self {
            Self::Decode(_) => BatchFailure::Decode,
            Self::Identity(_) => BatchFailure::Identity,
            Self::Persistence(_) => BatchFailure::Persistence,
            Self::Codec(_) => BatchFailure::Codec,
        }
    }
}

/// What happened to one ingested frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    /// Records in the frame.
    pub records: usize,
    /// Subscriber receivers the frame was queued for.
    pub receivers: usize,
    /// How the records reached the store.
    pub mode: PersistenceMode,
}

/// Single-consumer ingestion pipeline.
#[derive(Debug)]
pub struct TickIngestor {
    cache: Arc<SymbolIdentityCache>,
    buffer: Arc<PersistenceBuffer>,
    hub: Arc<BroadcastHub>,
    codec: CompressionCodec,
    mode: PersistenceMode,
}

impl TickIngestor {
    /// Wire the pipeline together.
    #[must_use]
    pub const fn new(
        cache: Arc<SymbolIdentityCache>,
        buffer: Arc<PersistenceBuffer>,
        hub: Arc<BroadcastHub>,
        codec: CompressionCodec,
        mode: PersistenceMode,
    ) -> Self {
        Self {
            cache,
            buffer,
            hub,
            codec,
            mode,
        }
    }

    /// Active persistence mode.
    #[must_use]
    pub const fn mode(&self) -> PersistenceMode {
        self.mode
    }

    /// Process one raw upstream frame.
    ///
    /// An empty array is a successful empty batch: nothing is stored and
    /// nothing is published.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError`] if any step fails; the failure is logged and
    /// counted before it is returned.
    pub async fn on_message(&self, raw: &str) -> Result<BatchReport, IngestError> {
        let started = Instant::now();

        match self.ingest(raw).await {
            Ok(report) => {
                if report.records > 0 {
                    metrics::record_ticks_received(report.records);
                    metrics::record_batch_ingested(started.elapsed());
                    tracing::debug!(
                        records = report.records,
                        receivers = report.receivers,
                        mode = %report.mode,
                        "Batch ingested"
                    );
                }
                Ok(report)
            }
            Err(err) => {
                let kind = err.kind();
                metrics::record_batch_failed(kind);
                tracing::warn!(reason = kind.as_str(), error = %err, "Batch abandoned");
                Err(err)
            }
        }
    }

    async fn ingest(&self, raw: &str) -> Result<BatchReport, IngestError> {
        let snapshots = decode_batch(raw)?;
        if snapshots.is_empty() {
            return Ok(BatchReport {
                records: 0,
                receivers: 0,
                mode: self.mode,
            });
        }

        let mut records: Vec<TickRecord> = Vec::with_capacity(snapshots.len());
        for snapshot in snapshots {
            let coin_id = self.cache.resolve(&snapshot.trading_pair).await?;
            records.push(snapshot.identify(coin_id));
        }

        let frame = self.codec.encode(&records)?;
        let count = records.len();

        match self.mode {
            PersistenceMode::Immediate => {
                self.buffer.persist(&records).await?;
            }
            PersistenceMode::Buffered => {
                self.buffer.enqueue(records)?;
            }
        }

        let receivers = self.hub.publish(frame);
        Ok(BatchReport {
            records: count,
            receivers,
            mode: self.mode,
        })
    }
}

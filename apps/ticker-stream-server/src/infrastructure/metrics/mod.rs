//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Ingestion**: ticks received, batches ingested or failed by reason
//! - **Fan-out**: frames published, frames dropped for lagging subscribers
//! - **Persistence**: pending records, flush latency, failures, dead letters
//! - **Upstream**: connection state and reconnects
//! - **Queries**: range query latency and outcomes
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
#[allow(clippy::expect_used)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let builder = PrometheusBuilder::new();
            let handle = builder
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Ingestion
    describe_counter!(
        "ticker_hub_ticks_received_total",
        "Total ticks decoded from the upstream feed"
    );
    describe_counter!(
        "ticker_hub_batches_ingested_total",
        "Upstream batches persisted and published"
    );
    describe_counter!(
        "ticker_hub_batches_failed_total",
        "Upstream batches aborted, by failure reason"
    );
    describe_histogram!(
        "ticker_hub_batch_processing_seconds",
        "Time from upstream frame to publish"
    );
    describe_gauge!(
        "ticker_hub_known_identities",
        "Trading pairs with an assigned identifier"
    );

    // Fan-out
    describe_counter!(
        "ticker_hub_frames_published_total",
        "Compressed frames published to the hub"
    );
    describe_counter!(
        "ticker_hub_frames_dropped_total",
        "Frames skipped by lagging subscribers"
    );
    describe_gauge!(
        "ticker_hub_subscribers",
        "Number of live subscriber connections"
    );

    // Persistence
    describe_gauge!(
        "ticker_hub_pending_records",
        "Records waiting for the next flush"
    );
    describe_histogram!(
        "ticker_hub_flush_seconds",
        "Duration of successful bulk flushes"
    );
    describe_counter!(
        "ticker_hub_flush_failures_total",
        "Bulk flushes that failed"
    );
    describe_counter!(
        "ticker_hub_dead_lettered_records_total",
        "Records moved to the dead-letter sink"
    );

    // Upstream
    describe_gauge!(
        "ticker_hub_upstream_connected",
        "1 while the upstream feed is connected"
    );
    describe_counter!(
        "ticker_hub_upstream_reconnects_total",
        "Upstream reconnection attempts"
    );

    // Queries
    describe_histogram!(
        "ticker_hub_query_seconds",
        "Range query latency by outcome"
    );
}

// =============================================================================
// Metric Labels
// =============================================================================

/// Why an upstream batch was aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchFailure {
    /// Frame did not decode.
    Decode,
    /// New identity could not be stored.
    Identity,
    /// Records could not be written or buffered.
    Persistence,
    /// Frame could not be compressed.
    Codec,
}

impl BatchFailure {
    /// Label value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Decode => "decode",
            Self::Identity => "identity",
            Self::Persistence => "persistence",
            Self::Codec => "codec",
        }
    }
}

/// Outcome of a range query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOutcome {
    /// Returned records (possibly none).
    Ok,
    /// Rejected at validation.
    Invalid,
    /// Unknown trading pair.
    NotFound,
    /// Store failure or timeout.
    Error,
}

impl QueryOutcome {
    /// Label value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Invalid => "invalid",
            Self::NotFound => "not_found",
            Self::Error => "error",
        }
    }
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record ticks decoded from one upstream frame.
pub fn record_ticks_received(count: usize) {
    counter!("ticker_hub_ticks_received_total").increment(count as u64);
}

/// Record a batch that made it through the pipeline.
pub fn record_batch_ingested(duration: Duration) {
    counter!("ticker_hub_batches_ingested_total").increment(1);
    histogram!("ticker_hub_batch_processing_seconds").record(duration.as_secs_f64());
}

/// Record an aborted batch.
pub fn record_batch_failed(reason: BatchFailure) {
    counter!(
        "ticker_hub_batches_failed_total",
        "reason" => reason.as_str()
    )
    .increment(1);
}

/// Update the number of known identities.
#[allow(clippy::cast_precision_loss)]
pub fn set_known_identities(count: usize) {
    gauge!("ticker_hub_known_identities").set(count as f64);
}

/// Record a frame handed to the hub.
pub fn record_frame_published() {
    counter!("ticker_hub_frames_published_total").increment(1);
}

/// Record frames a lagging subscriber skipped.
pub fn record_frames_dropped(count: u64) {
    counter!("ticker_hub_frames_dropped_total").increment(count);
}

/// Update the live subscriber count.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscribers(count: usize) {
    gauge!("ticker_hub_subscribers").set(count as f64);
}

/// Update the pending record count.
#[allow(clippy::cast_precision_loss)]
pub fn set_pending_records(count: usize) {
    gauge!("ticker_hub_pending_records").set(count as f64);
}

/// Record a successful flush.
pub fn record_flush(duration: Duration) {
    histogram!("ticker_hub_flush_seconds").record(duration.as_secs_f64());
}

/// Record a failed flush.
pub fn record_flush_failure() {
    counter!("ticker_hub_flush_failures_total").increment(1);
}

/// Record records moved to the dead-letter sink.
pub fn record_dead_lettered(count: usize) {
    counter!("ticker_hub_dead_lettered_records_total").increment(count as u64);
}

/// Update the upstream connection gauge.
pub fn set_upstream_connected(connected: bool) {
    gauge!("ticker_hub_upstream_connected").set(if connected { 1.0 } else { 0.0 });
}

/// Record an upstream reconnection attempt.
pub fn record_reconnect() {
    counter!("ticker_hub_upstream_reconnects_total").increment(1);
}

/// Record a range query.
pub fn record_query(outcome: QueryOutcome, duration: Duration) {
    histogram!(
        "ticker_hub_query_seconds",
        "outcome" => outcome.as_str()
    )
    .record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================

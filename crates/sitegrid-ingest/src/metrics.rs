//! Ingest metrics.
//!
//! The pipeline reports through an injected [`MetricsSink`]. The default
//! [`RecorderMetricsSink`] forwards to the `metrics` facade; install a
//! recorder and call [`register_metrics`] once at startup.

use std::time::Duration;

use metrics::{counter, describe_counter, describe_histogram, histogram};

use crate::integrator::BatchStats;
use crate::retirement::RetirementResult;

// ============================================================================
// Ingest Metrics
// ============================================================================

/// Batches integrated counter.
pub const INGEST_BATCHES: &str = "sitegrid_ingest_batches_total";

/// Batches failed counter, labelled by error kind.
pub const INGEST_FAILURES: &str = "sitegrid_ingest_failures_total";

/// Cell passes added counter.
pub const INGEST_PASSES: &str = "sitegrid_ingest_passes_total";

/// Segments written counter.
pub const INGEST_SEGMENTS_WRITTEN: &str = "sitegrid_ingest_segments_written_total";

/// Bytes committed counter.
pub const INGEST_BYTES: &str = "sitegrid_ingest_bytes_written_total";

/// Batch duration histogram.
pub const INGEST_DURATION: &str = "sitegrid_ingest_batch_duration_seconds";

// ============================================================================
// Retirement Metrics
// ============================================================================

/// Retirement enqueue failures counter.
pub const RETIREMENT_ENQUEUE_FAILURES: &str = "sitegrid_retirement_enqueue_failures_total";

/// Segments purged counter.
pub const RETIREMENT_SEGMENTS_PURGED: &str = "sitegrid_retirement_segments_purged_total";

/// Purge errors counter.
pub const RETIREMENT_ERRORS: &str = "sitegrid_retirement_errors_total";

/// Registers all ingest metric descriptions.
pub fn register_metrics() {
    describe_counter!(INGEST_BATCHES, "Total ingest batches integrated");
    describe_counter!(INGEST_FAILURES, "Total ingest batches that failed");
    describe_counter!(INGEST_PASSES, "Total cell passes added by ingest");
    describe_counter!(INGEST_SEGMENTS_WRITTEN, "Total segments written by ingest");
    describe_counter!(INGEST_BYTES, "Total bytes committed by ingest");
    describe_histogram!(INGEST_DURATION, "Duration of ingest batches in seconds");
    describe_counter!(
        RETIREMENT_ENQUEUE_FAILURES,
        "Total failures to queue superseded segments"
    );
    describe_counter!(RETIREMENT_SEGMENTS_PURGED, "Total retired segments deleted");
    describe_counter!(RETIREMENT_ERRORS, "Total retirement purge errors");
}

/// Receives pipeline measurements.
pub trait MetricsSink: Send + Sync {
    /// A batch was integrated.
    fn batch_completed(&self, stats: &BatchStats, elapsed: Duration);

    /// A batch failed with an error of `kind`.
    fn batch_failed(&self, kind: &'static str);

    /// Superseded segments could not be queued for retirement.
    fn retirement_enqueue_failed(&self);

    /// A purge pass finished.
    fn retirement_purged(&self, result: &RetirementResult);
}

/// Emits through the `metrics` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct RecorderMetricsSink;

impl MetricsSink for RecorderMetricsSink {
    fn batch_completed(&self, stats: &BatchStats, elapsed: Duration) {
        counter!(INGEST_BATCHES).increment(1);
        counter!(INGEST_PASSES).increment(stats.passes_added as u64);
        counter!(INGEST_SEGMENTS_WRITTEN).increment(stats.segments_written as u64);
        counter!(INGEST_BYTES).increment(stats.commit.bytes_written);
        histogram!(INGEST_DURATION).record(elapsed.as_secs_f64());
    }

    fn batch_failed(&self, kind: &'static str) {
        counter!(INGEST_FAILURES, "kind" => kind).increment(1);
    }

    fn retirement_enqueue_failed(&self) {
        counter!(RETIREMENT_ENQUEUE_FAILURES).increment(1);
    }

    fn retirement_purged(&self, result: &RetirementResult) {
        counter!(RETIREMENT_SEGMENTS_PURGED).increment(result.segments_deleted as u64);
        counter!(RETIREMENT_ERRORS).increment(result.errors.len() as u64);
    }
}

/// Discards every measurement.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn batch_completed(&self, _stats: &BatchStats, _elapsed: Duration) {}

    fn batch_failed(&self, _kind: &'static str) {}

    fn retirement_enqueue_failed(&self) {}

    fn retirement_purged(&self, _result: &RetirementResult) {}
}

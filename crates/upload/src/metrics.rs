//! Prometheus metrics for the upload pipeline.
//!
//! Metrics carry no filenames or hashes; only aggregate counts and timings.

use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Session metrics
pub static UPLOAD_SESSIONS_CREATED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "lanvan_upload_sessions_created_total",
        "Total number of upload sessions admitted",
    )
    .expect("metric creation failed")
});

pub static UPLOAD_SESSIONS_COMMITTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "lanvan_upload_sessions_committed_total",
        "Total number of upload sessions published",
    )
    .expect("metric creation failed")
});

pub static UPLOAD_SESSIONS_ABORTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "lanvan_upload_sessions_aborted_total",
        "Total number of upload sessions cancelled by the caller",
    )
    .expect("metric creation failed")
});

// Chunk metrics
pub static CHUNKS_WRITTEN: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "lanvan_chunks_written_total",
        "Total number of staged chunks written to temp files",
    )
    .expect("metric creation failed")
});

pub static BYTES_RECEIVED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "lanvan_bytes_received_total",
        "Total plaintext bytes accepted",
    )
    .expect("metric creation failed")
});

// Timing metrics
pub static SLOT_WAIT_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "lanvan_slot_wait_duration_seconds",
            "Time a session waited for a worker slot",
        )
        .buckets(vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0, 600.0]),
    )
    .expect("metric creation failed")
});

pub static UPLOAD_COMMIT_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "lanvan_upload_commit_duration_seconds",
            "Time taken to verify and publish a finished session",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
    )
    .expect("metric creation failed")
});

// Error metrics
pub static UPLOAD_ERRORS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "lanvan_upload_errors_total",
            "Total upload errors by error kind",
        ),
        &["error_kind"],
    )
    .expect("metric creation failed")
});

// Current state gauges
pub static ACTIVE_UPLOAD_SESSIONS: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "lanvan_active_upload_sessions",
        "Admitted sessions that have not reached a terminal state",
    )
    .expect("metric creation failed")
});

pub static RECEIVING_UPLOAD_SESSIONS: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "lanvan_receiving_upload_sessions",
        "Sessions currently holding a worker slot",
    )
    .expect("metric creation failed")
});

/// Guard to ensure metrics are only registered once.
static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// Idempotent, so tests and embedded routers can call it freely.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(UPLOAD_SESSIONS_CREATED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOAD_SESSIONS_COMMITTED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOAD_SESSIONS_ABORTED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CHUNKS_WRITTEN.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BYTES_RECEIVED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(SLOT_WAIT_DURATION.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOAD_COMMIT_DURATION.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOAD_ERRORS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(ACTIVE_UPLOAD_SESSIONS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(RECEIVING_UPLOAD_SESSIONS.clone()))
            .expect("metric registration failed");
    });
}

/// Encode every registered metric in the Prometheus text format.
pub fn encode_text() -> Result<Vec<u8>, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(buffer)
}

/// Helper to record upload errors by kind.
pub fn record_upload_error(error_kind: &str) {
    UPLOAD_ERRORS.with_label_values(&[error_kind]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registration() {
        register_metrics();
        register_metrics();
        record_upload_error("integrity");
        let text = String::from_utf8(encode_text().unwrap()).unwrap();
        assert!(text.contains("lanvan_upload_errors_total"));
    }
}

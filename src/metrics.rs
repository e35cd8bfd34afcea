//! Prometheus metrics for the retrieval core.
//!
//! Exposes:
//! - `reflect_rag_command_duration_seconds` (histogram)
//! - `reflect_rag_command_total` (counter with status)
//! - `reflect_rag_command_inflight` (gauge)
//! - `reflect_rag_retrieval_total` (counter by strategy and status)
//! - `reflect_rag_retrieval_duration_seconds` (histogram)
//! - `reflect_rag_cascade_stage_total` (counter by stage)
//! - `reflect_rag_embedding_failures_total` (counter by provider)
//! - `reflect_rag_skipped_records_total` (counter by record kind)
//! - process metrics via `process` collector

use std::time::Duration;

use once_cell::sync::Lazy;
use prometheus::process_collector::ProcessCollector;
use prometheus::{
    default_registry, register_histogram_vec, register_int_counter_vec, register_int_gauge_vec,
    Encoder, HistogramVec, IntCounterVec, IntGaugeVec, TextEncoder,
};
use tracing::{error, warn};

static PROCESS_COLLECTOR: Lazy<()> = Lazy::new(|| {
    if let Err(err) = default_registry().register(Box::new(ProcessCollector::for_self())) {
        warn!("Failed to register process collector: {}", err);
    }
});

static COMMAND_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    // Exponential buckets from 50ms up to ~3 minutes.
    let buckets =
        prometheus::exponential_buckets(0.05, 2.0, 14).expect("failed to create histogram buckets");
    register_histogram_vec!(
        "reflect_rag_command_duration_seconds",
        "CLI command duration in seconds",
        &["command"],
        buckets
    )
    .expect("failed to register command duration histogram")
});

static COMMAND_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "reflect_rag_command_total",
        "Total command executions by status",
        &["command", "status"]
    )
    .expect("failed to register command counter")
});

static COMMAND_INFLIGHT: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "reflect_rag_command_inflight",
        "Number of in-flight commands",
        &["command"]
    )
    .expect("failed to register inflight gauge")
});

static RETRIEVAL_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "reflect_rag_retrieval_total",
        "Retrieval queries by strategy and outcome",
        &["strategy", "status"]
    )
    .expect("failed to register retrieval counter")
});

static RETRIEVAL_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    // Queries are in-memory; 100us up to ~1.6s.
    let buckets = prometheus::exponential_buckets(0.0001, 2.0, 15)
        .expect("failed to create histogram buckets");
    register_histogram_vec!(
        "reflect_rag_retrieval_duration_seconds",
        "Retrieval query duration in seconds",
        &["strategy"],
        buckets
    )
    .expect("failed to register retrieval duration histogram")
});

static CASCADE_STAGE_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "reflect_rag_cascade_stage_total",
        "Graph cascade stage activations",
        &["stage"]
    )
    .expect("failed to register cascade stage counter")
});

static EMBEDDING_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "reflect_rag_embedding_failures_total",
        "Embedding provider failures",
        &["provider"]
    )
    .expect("failed to register embedding failure counter")
});

static SKIPPED_RECORDS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "reflect_rag_skipped_records_total",
        "Raw records skipped during normalization",
        &["kind"]
    )
    .expect("failed to register skipped record counter")
});

/// Ensure collectors are registered.
fn init_collectors() {
    Lazy::force(&PROCESS_COLLECTOR);
    Lazy::force(&COMMAND_DURATION);
    Lazy::force(&COMMAND_TOTAL);
    Lazy::force(&COMMAND_INFLIGHT);
    Lazy::force(&RETRIEVAL_TOTAL);
    Lazy::force(&RETRIEVAL_DURATION);
    Lazy::force(&CASCADE_STAGE_TOTAL);
    Lazy::force(&EMBEDDING_FAILURES);
    Lazy::force(&SKIPPED_RECORDS);
}

/// Increment inflight gauge for a command.
pub fn record_command_start(command: &'static str) {
    init_collectors();
    COMMAND_INFLIGHT.with_label_values(&[command]).inc();
}

/// Record command completion with duration and status.
pub fn record_command_result(command: &'static str, duration: Duration, success: bool) {
    init_collectors();
    COMMAND_INFLIGHT.with_label_values(&[command]).dec();
    COMMAND_DURATION
        .with_label_values(&[command])
        .observe(duration.as_secs_f64());
    COMMAND_TOTAL
        .with_label_values(&[command, if success { "ok" } else { "error" }])
        .inc();
}

/// Record one answered query. `empty` marks queries that produced no results.
pub fn record_retrieval(strategy: &str, duration: Duration, empty: bool) {
    init_collectors();
    RETRIEVAL_DURATION
        .with_label_values(&[strategy])
        .observe(duration.as_secs_f64());
    RETRIEVAL_TOTAL
        .with_label_values(&[strategy, if empty { "empty" } else { "ok" }])
        .inc();
}

pub fn record_cascade_stage(stage: &str) {
    init_collectors();
    CASCADE_STAGE_TOTAL.with_label_values(&[stage]).inc();
}

pub fn record_embedding_failure(provider: &str) {
    init_collectors();
    EMBEDDING_FAILURES.with_label_values(&[provider]).inc();
}

pub fn record_skipped_records(kind: &str, count: usize) {
    if count == 0 {
        return;
    }
    init_collectors();
    SKIPPED_RECORDS
        .with_label_values(&[kind])
        .inc_by(count as u64);
}

/// Render all registered metrics in the Prometheus text format.
pub fn render() -> String {
    init_collectors();
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", err);
        return String::new();
    }

    String::from_utf8_lossy(&buffer).into_owned()
}

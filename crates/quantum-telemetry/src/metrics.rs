//! Prometheus metrics for the verification protocol.
//!
//! All metrics follow the naming convention: `qc_verifier_<metric>_<unit>`

use lazy_static::lazy_static;
use prometheus::{
    exponential_buckets, Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, Opts,
    Registry, TextEncoder,
};
use std::sync::Arc;

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // REQUESTOR SIDE
    // =========================================================================

    /// Requests handed to the broker
    pub static ref VERIFICATION_REQUESTS_SENT: Counter = Counter::new(
        "qc_verifier_requests_sent_total",
        "Verification requests sent to the worker queue"
    ).expect("metric creation failed");

    /// Registrations rolled back because the send failed
    pub static ref VERIFICATION_ROLLBACKS: Counter = Counter::new(
        "qc_verifier_rollbacks_total",
        "Verification requests rolled back after a transport failure"
    ).expect("metric creation failed");

    /// Responses by demultiplexer result
    pub static ref VERIFICATION_RESPONSES: CounterVec = CounterVec::new(
        Opts::new("qc_verifier_responses_total", "Responses received by the demultiplexer"),
        &["result"]  // matched / unmatched / undecodable
    ).expect("metric creation failed");

    /// Matched responses by verdict
    pub static ref VERIFICATION_OUTCOMES: CounterVec = CounterVec::new(
        Opts::new("qc_verifier_outcomes_total", "Verification verdicts delivered to callers"),
        &["outcome"]  // verified / rejected
    ).expect("metric creation failed");

    /// Requests awaiting a response
    pub static ref VERIFICATION_IN_FLIGHT: Gauge = Gauge::new(
        "qc_verifier_in_flight",
        "Verification requests awaiting a response"
    ).expect("metric creation failed");

    /// Time from registration to resolution
    pub static ref VERIFICATION_ROUND_TRIP: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "qc_verifier_round_trip_seconds",
            "Time from request registration to response"
        ).buckets(exponential_buckets(0.0005, 2.0, 16).expect("valid buckets"))
    ).expect("metric creation failed");

    // =========================================================================
    // ORCHESTRATION
    // =========================================================================

    /// Worker processes launched
    pub static ref VERIFIER_WORKERS_STARTED: Counter = Counter::new(
        "qc_verifier_workers_started_total",
        "Out-of-process verifier workers launched"
    ).expect("metric creation failed");

    /// Readiness polls that hit their deadline
    pub static ref READINESS_TIMEOUTS: Counter = Counter::new(
        "qc_verifier_readiness_timeouts_total",
        "Readiness polls that timed out"
    ).expect("metric creation failed");

    // =========================================================================
    // WORKER SIDE
    // =========================================================================

    /// Transactions checked by a worker
    pub static ref WORKER_TRANSACTIONS_CHECKED: CounterVec = CounterVec::new(
        Opts::new("qc_verifier_worker_transactions_total", "Transactions checked by this worker"),
        &["outcome"]  // verified / rejected
    ).expect("metric creation failed");
}

/// Handle for the registered metrics
pub struct MetricsHandle {
    _registry: Arc<Registry>,
}

/// Register all metrics with the global registry.
///
/// Metrics already registered by an earlier call are left alone.
pub fn register_metrics() -> Result<MetricsHandle, TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(VERIFICATION_REQUESTS_SENT.clone()),
        Box::new(VERIFICATION_ROLLBACKS.clone()),
        Box::new(VERIFICATION_RESPONSES.clone()),
        Box::new(VERIFICATION_OUTCOMES.clone()),
        Box::new(VERIFICATION_IN_FLIGHT.clone()),
        Box::new(VERIFICATION_ROUND_TRIP.clone()),
        Box::new(VERIFIER_WORKERS_STARTED.clone()),
        Box::new(READINESS_TIMEOUTS.clone()),
        Box::new(WORKER_TRANSACTIONS_CHECKED.clone()),
    ];

    for metric in metrics {
        match REGISTRY.register(metric) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(TelemetryError::MetricsInit(e.to_string())),
        }
    }

    Ok(MetricsHandle {
        _registry: Arc::new(REGISTRY.clone()),
    })
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

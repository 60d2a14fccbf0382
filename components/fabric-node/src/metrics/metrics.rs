//! Prometheus metrics for the dispatch fabric, scraped from the server
//! process's `/metrics` endpoint (metrics::http).

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram_vec, CounterVec,
    Gauge, GaugeVec, HistogramVec,
};
use std::time::Instant;

/// Helper to observe a histogram duration from a start instant.
pub fn observe_duration(hist: prometheus::Histogram, start: Instant) {
    let elapsed = start.elapsed().as_secs_f64();
    hist.observe(elapsed);
}

lazy_static! {
    /// Current depth of each topic's pending-task queue.
    pub static ref TOPIC_QUEUE_DEPTH: GaugeVec = register_gauge_vec!(
        "fabric_topic_queue_depth",
        "Number of tasks pending in a topic's queue",
        &["topic"]
    ).unwrap();

    /// Current size of each topic's idle-worker roster.
    pub static ref TOPIC_IDLE_WORKERS: GaugeVec = register_gauge_vec!(
        "fabric_topic_idle_workers",
        "Number of idle workers currently in a topic's roster",
        &["topic"]
    ).unwrap();

    /// Admission semaphore permits currently held (in-flight RPC handlers
    /// past the admit point).
    pub static ref ADMISSION_PERMITS_IN_USE: Gauge = register_gauge!(
        "fabric_admission_permits_in_use",
        "Number of admission semaphore permits currently in use"
    ).unwrap();

    pub static ref REQUESTS_ADMITTED: CounterVec = register_counter_vec!(
        "fabric_requests_admitted_total",
        "Total RPC calls admitted past the semaphore, by method",
        &["method"]
    ).unwrap();

    pub static ref REQUESTS_COMPLETED: CounterVec = register_counter_vec!(
        "fabric_requests_completed_total",
        "Total RPC calls that received a reply (success or in-band error), by method",
        &["method"]
    ).unwrap();

    pub static ref REQUESTS_FAILED: CounterVec = register_counter_vec!(
        "fabric_requests_failed_total",
        "Total RPC calls that failed at the transport/fabric level, by method",
        &["method"]
    ).unwrap();

    pub static ref REQUEST_LATENCY_SECONDS: HistogramVec = register_histogram_vec!(
        "fabric_request_latency_seconds",
        "End-to-end RPC latency, admit to reply, by method",
        &["method"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
    ).unwrap();
}

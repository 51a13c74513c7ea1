use once_cell::sync::Lazy;
use prometheus::{Counter, Gauge, Histogram, HistogramOpts};

#[cfg(feature = "bench-no-metrics")]
mod shim {
    use super::*;
    pub struct NoopCounter;
    impl NoopCounter { pub fn inc(&self) {} }
    pub struct NoopGauge;
    impl NoopGauge { pub fn set(&self, _v: f64) {} }
    pub struct NoopHistogram;
    impl NoopHistogram { pub fn observe(&self, _v: f64) {} }
    pub static LOOKUPS_TOTAL: Lazy<NoopCounter> = Lazy::new(|| NoopCounter);
    pub static OVERFLOW_HITS_TOTAL: Lazy<NoopCounter> = Lazy::new(|| NoopCounter);
    pub static MODEL_READS_TOTAL: Lazy<NoopCounter> = Lazy::new(|| NoopCounter);
    pub static TREE_READS_TOTAL: Lazy<NoopCounter> = Lazy::new(|| NoopCounter);
    pub static LOOKUP_MISSES_TOTAL: Lazy<NoopCounter> = Lazy::new(|| NoopCounter);
    pub static ROUTING_ERRORS_TOTAL: Lazy<NoopCounter> = Lazy::new(|| NoopCounter);
    pub static PROBE_LEN: Lazy<NoopHistogram> = Lazy::new(|| NoopHistogram);
    pub static REBUILDS_TOTAL: Lazy<NoopCounter> = Lazy::new(|| NoopCounter);
    pub static REBUILDS_CANCELLED_TOTAL: Lazy<NoopCounter> = Lazy::new(|| NoopCounter);
    pub static REBUILD_DURATION_SECONDS: Lazy<NoopHistogram> = Lazy::new(|| NoopHistogram);
    pub static EXPERTS_MODEL: Lazy<NoopGauge> = Lazy::new(|| NoopGauge);
    pub static EXPERTS_TREE: Lazy<NoopGauge> = Lazy::new(|| NoopGauge);
    pub static EXPERTS_INVALID: Lazy<NoopGauge> = Lazy::new(|| NoopGauge);
    pub static EXPERT_ERROR_MAX: Lazy<NoopGauge> = Lazy::new(|| NoopGauge);
    pub fn render() -> String { String::new() }
}

#[cfg(feature = "bench-no-metrics")]
pub use shim::{
    EXPERTS_INVALID, EXPERTS_MODEL, EXPERTS_TREE, EXPERT_ERROR_MAX, LOOKUPS_TOTAL,
    LOOKUP_MISSES_TOTAL, MODEL_READS_TOTAL, OVERFLOW_HITS_TOTAL, PROBE_LEN,
    REBUILDS_CANCELLED_TOTAL, REBUILDS_TOTAL, REBUILD_DURATION_SECONDS, ROUTING_ERRORS_TOTAL,
    TREE_READS_TOTAL, render,
};

#[cfg(not(feature = "bench-no-metrics"))]
pub static LOOKUPS_TOTAL: Lazy<Counter> = Lazy::new(|| {
    prometheus::register_counter!("learned_index_lookups_total", "Total number of find calls")
        .expect("register learned_index_lookups_total")
});

#[cfg(not(feature = "bench-no-metrics"))]
pub static OVERFLOW_HITS_TOTAL: Lazy<Counter> = Lazy::new(|| {
    prometheus::register_counter!(
        "learned_index_overflow_hits_total",
        "Lookups answered from the overflow buffer"
    )
    .expect("register learned_index_overflow_hits_total")
});

// Reads by serving path
#[cfg(not(feature = "bench-no-metrics"))]
pub static MODEL_READS_TOTAL: Lazy<Counter> = Lazy::new(|| {
    prometheus::register_counter!(
        "learned_index_model_reads_total",
        "Successful lookups served by a model expert's bounded scan"
    )
    .expect("register learned_index_model_reads_total")
});

#[cfg(not(feature = "bench-no-metrics"))]
pub static TREE_READS_TOTAL: Lazy<Counter> = Lazy::new(|| {
    prometheus::register_counter!(
        "learned_index_tree_reads_total",
        "Successful lookups served by a tree expert"
    )
    .expect("register learned_index_tree_reads_total")
});

#[cfg(not(feature = "bench-no-metrics"))]
pub static LOOKUP_MISSES_TOTAL: Lazy<Counter> = Lazy::new(|| {
    prometheus::register_counter!(
        "learned_index_lookup_misses_total",
        "Lookups that found no record"
    )
    .expect("register learned_index_lookup_misses_total")
});

#[cfg(not(feature = "bench-no-metrics"))]
pub static ROUTING_ERRORS_TOTAL: Lazy<Counter> = Lazy::new(|| {
    prometheus::register_counter!(
        "learned_index_routing_errors_total",
        "Lookups routed to an expert that was never trained"
    )
    .expect("register learned_index_routing_errors_total")
});

#[cfg(not(feature = "bench-no-metrics"))]
pub static PROBE_LEN: Lazy<Histogram> = Lazy::new(|| {
    let opts = HistogramOpts::new(
        "learned_index_probe_len",
        "Snapshot slots scanned per model-expert lookup",
    )
    .buckets(vec![1.0, 2.0, 4.0, 8.0, 16.0, 32.0, 64.0, 128.0, 256.0]);
    prometheus::register_histogram!(opts).expect("register learned_index_probe_len")
});

#[cfg(not(feature = "bench-no-metrics"))]
pub static REBUILDS_TOTAL: Lazy<Counter> = Lazy::new(|| {
    prometheus::register_counter!(
        "learned_index_rebuilds_total",
        "Total number of completed index rebuilds"
    )
    .expect("register learned_index_rebuilds_total")
});

#[cfg(not(feature = "bench-no-metrics"))]
pub static REBUILDS_CANCELLED_TOTAL: Lazy<Counter> = Lazy::new(|| {
    prometheus::register_counter!(
        "learned_index_rebuilds_cancelled_total",
        "Background rebuilds cancelled before swap"
    )
    .expect("register learned_index_rebuilds_cancelled_total")
});

#[cfg(not(feature = "bench-no-metrics"))]
pub static REBUILD_DURATION_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    let opts = HistogramOpts::new(
        "learned_index_rebuild_duration_seconds",
        "Duration of index rebuilds in seconds",
    )
    .buckets(vec![0.01, 0.05, 0.1, 0.2, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]);
    prometheus::register_histogram!(opts).expect("register learned_index_rebuild_duration_seconds")
});

// Expert mode split of the latest generation
#[cfg(not(feature = "bench-no-metrics"))]
pub static EXPERTS_MODEL: Lazy<Gauge> = Lazy::new(|| {
    prometheus::register_gauge!("learned_index_experts_model", "Experts serving from a model")
        .expect("register learned_index_experts_model")
});

#[cfg(not(feature = "bench-no-metrics"))]
pub static EXPERTS_TREE: Lazy<Gauge> = Lazy::new(|| {
    prometheus::register_gauge!("learned_index_experts_tree", "Experts serving from a tree")
        .expect("register learned_index_experts_tree")
});

#[cfg(not(feature = "bench-no-metrics"))]
pub static EXPERTS_INVALID: Lazy<Gauge> = Lazy::new(|| {
    prometheus::register_gauge!("learned_index_experts_invalid", "Experts left untrained")
        .expect("register learned_index_experts_invalid")
});

#[cfg(not(feature = "bench-no-metrics"))]
pub static EXPERT_ERROR_MAX: Lazy<Gauge> = Lazy::new(|| {
    prometheus::register_gauge!(
        "learned_index_expert_error_max",
        "Largest absolute error bound among model experts"
    )
    .expect("register learned_index_expert_error_max")
});

#[cfg(not(feature = "bench-no-metrics"))]
pub fn render() -> String {
    use prometheus::{Encoder, TextEncoder};
    let mut buf = Vec::new();
    let encoder = TextEncoder::new();
    let mf = prometheus::gather();
    if encoder.encode(&mf, &mut buf).is_err() {
        return String::new();
    }
    String::from_utf8_lossy(&buf).into_owned()
}

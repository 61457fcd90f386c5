//! Prometheus instrumentation for the indexer process.
//!
//! Purely operational visibility: throughput, latency, and error counters
//! for the ingestion pipeline, updated from the block processor and reorg
//! manager. This has nothing to do with the protocol-level `Weekly*`/
//! `Monthly*`/`NetworkMetric` rollups computed by `metrics_rollup` — those
//! are domain state written inside the block transaction; these are process
//! gauges scraped by an external collector. Handlers stay pure per their
//! own doc comments and never touch this module directly; the block
//! processor records `indexer_faults_total`/`indexer_proofs_total` after a
//! handler returns successfully.

use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge,
    IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::time::Instant;

/// Standard latency buckets (seconds).
const LATENCY_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0];

lazy_static! {
    /// Global Prometheus registry for this process.
    pub static ref REGISTRY: Registry = Registry::new();

    pub static ref BLOCKS_PROCESSED: IntCounterVec = IntCounterVec::new(
        Opts::new("indexer_blocks_processed_total", "Total blocks committed by chain"),
        &["chain"]
    ).unwrap();

    /// Logs successfully dispatched to a handler, by chain and trigger definition.
    pub static ref LOGS_DISPATCHED: IntCounterVec = IntCounterVec::new(
        Opts::new("indexer_logs_dispatched_total", "Logs dispatched to a handler by chain and trigger"),
        &["chain", "trigger"]
    ).unwrap();

    /// Parked transactions resolved via a function-trigger dispatch, by chain and trigger definition.
    pub static ref TXS_DISPATCHED: IntCounterVec = IntCounterVec::new(
        Opts::new("indexer_txs_dispatched_total", "Transactions dispatched to a handler by chain and trigger"),
        &["chain", "trigger"]
    ).unwrap();

    pub static ref HANDLER_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new("indexer_handler_duration_seconds", "Handler execution latency")
            .buckets(LATENCY_BUCKETS.to_vec()),
        &["handler"]
    ).unwrap();

    pub static ref REORG_EVENTS: IntCounterVec = IntCounterVec::new(
        Opts::new("indexer_reorg_events_total", "Reorgs observed by chain"),
        &["chain"]
    ).unwrap();

    /// Depth of the most recently handled reorg, by chain.
    pub static ref REORG_DEPTH: IntGaugeVec = IntGaugeVec::new(
        Opts::new("indexer_reorg_depth", "Depth of the most recent reorg by chain"),
        &["chain"]
    ).unwrap();

    pub static ref PENDING_TX_QUEUE_SIZE: IntGaugeVec = IntGaugeVec::new(
        Opts::new("indexer_pending_tx_queue_size", "Parked transactions awaiting their event, by chain"),
        &["chain"]
    ).unwrap();

    pub static ref PENDING_TX_DROPPED: IntCounterVec = IntCounterVec::new(
        Opts::new("indexer_pending_tx_dropped_total", "Parked transactions dropped after max attempts, by chain"),
        &["chain"]
    ).unwrap();

    pub static ref STORE_ERRORS: IntCounterVec = IntCounterVec::new(
        Opts::new("indexer_store_errors_total", "Store errors by operation"),
        &["op"]
    ).unwrap();

    pub static ref SUMTREE_NODES: IntGaugeVec = IntGaugeVec::new(
        Opts::new("indexer_sumtree_nodes_total", "Sum-tree nodes tracked by chain"),
        &["chain"]
    ).unwrap();

    pub static ref RANDOMNESS_UNAVAILABLE: IntCounterVec = IntCounterVec::new(
        Opts::new("indexer_randomness_unavailable_total", "Randomness lookups that failed or were unsupported, by chain"),
        &["chain"]
    ).unwrap();

    /// Faults recorded by `FaultRecordedHandler`, counted by the block processor after the handler commits.
    pub static ref FAULTS_TOTAL: IntCounter = IntCounter::new(
        "indexer_faults_total",
        "Total fault records committed"
    ).unwrap();

    /// Proofs recorded by `PossessionProvenHandler`, counted by the block processor after the handler commits.
    pub static ref PROOFS_TOTAL: IntCounter = IntCounter::new(
        "indexer_proofs_total",
        "Total possession proofs committed"
    ).unwrap();

    pub static ref SERVICE_START_TIMESTAMP: IntGauge = IntGauge::new(
        "indexer_service_start_timestamp_seconds",
        "Unix timestamp when the process started"
    ).unwrap();

    pub static ref UPTIME_SECONDS: IntGauge = IntGauge::new(
        "indexer_uptime_seconds",
        "Process uptime in seconds"
    ).unwrap();
}

static INIT: std::sync::Once = std::sync::Once::new();

/// Registers every metric with the global registry. Idempotent: callable
/// from multiple tests in the same process without a duplicate-registration
/// error. Call once at process startup.
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    let mut result = Ok(());
    INIT.call_once(|| {
        result = try_register();
    });
    result
}

fn try_register() -> Result<(), Box<dyn std::error::Error>> {
    REGISTRY.register(Box::new(BLOCKS_PROCESSED.clone()))?;
    REGISTRY.register(Box::new(LOGS_DISPATCHED.clone()))?;
    REGISTRY.register(Box::new(TXS_DISPATCHED.clone()))?;
    REGISTRY.register(Box::new(HANDLER_DURATION.clone()))?;
    REGISTRY.register(Box::new(REORG_EVENTS.clone()))?;
    REGISTRY.register(Box::new(REORG_DEPTH.clone()))?;
    REGISTRY.register(Box::new(PENDING_TX_QUEUE_SIZE.clone()))?;
    REGISTRY.register(Box::new(PENDING_TX_DROPPED.clone()))?;
    REGISTRY.register(Box::new(STORE_ERRORS.clone()))?;
    REGISTRY.register(Box::new(SUMTREE_NODES.clone()))?;
    REGISTRY.register(Box::new(RANDOMNESS_UNAVAILABLE.clone()))?;
    REGISTRY.register(Box::new(FAULTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(PROOFS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SERVICE_START_TIMESTAMP.clone()))?;
    REGISTRY.register(Box::new(UPTIME_SECONDS.clone()))?;

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)?
        .as_secs();
    SERVICE_START_TIMESTAMP.set(now as i64);

    Ok(())
}

/// Renders the registry in Prometheus text exposition format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

/// Measures an elapsed duration for a histogram observation.
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    pub fn observe(self, histogram: &Histogram) {
        histogram.observe(self.elapsed_secs());
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

pub fn record_block_processed(chain: &str) {
    BLOCKS_PROCESSED.with_label_values(&[chain]).inc();
}

pub fn record_log_dispatched(chain: &str, trigger: &str) {
    LOGS_DISPATCHED.with_label_values(&[chain, trigger]).inc();
}

pub fn record_tx_dispatched(chain: &str, trigger: &str) {
    TXS_DISPATCHED.with_label_values(&[chain, trigger]).inc();
}

pub fn record_handler_duration(handler: &str, duration_secs: f64) {
    HANDLER_DURATION.with_label_values(&[handler]).observe(duration_secs);
}

pub fn record_reorg(chain: &str, depth: i64) {
    REORG_EVENTS.with_label_values(&[chain]).inc();
    REORG_DEPTH.with_label_values(&[chain]).set(depth);
}

pub fn set_pending_tx_queue_size(chain: &str, size: i64) {
    PENDING_TX_QUEUE_SIZE.with_label_values(&[chain]).set(size);
}

pub fn record_pending_tx_dropped(chain: &str) {
    PENDING_TX_DROPPED.with_label_values(&[chain]).inc();
}

pub fn record_store_error(op: &str) {
    STORE_ERRORS.with_label_values(&[op]).inc();
}

pub fn set_sumtree_nodes(chain: &str, count: i64) {
    SUMTREE_NODES.with_label_values(&[chain]).set(count);
}

pub fn record_randomness_unavailable(chain: &str) {
    RANDOMNESS_UNAVAILABLE.with_label_values(&[chain]).inc();
}

pub fn record_fault() {
    FAULTS_TOTAL.inc();
}

pub fn record_proof() {
    PROOFS_TOTAL.inc();
}

pub fn update_uptime() {
    let start = SERVICE_START_TIMESTAMP.get();
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs();
    UPTIME_SECONDS.set((now - start as u64) as i64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_metrics_registers_without_panicking() {
        init_metrics().unwrap();
    }

    #[test]
    fn gather_metrics_reflects_recorded_values() {
        init_metrics().unwrap();
        record_block_processed("sepolia");
        set_pending_tx_queue_size("sepolia", 3);

        let output = gather_metrics();
        assert!(output.contains("indexer_blocks_processed_total"));
        assert!(output.contains("indexer_pending_tx_queue_size"));
    }

    #[test]
    fn reorg_metric_records_count_and_depth_together() {
        init_metrics().unwrap();
        record_reorg("sepolia", 4);
        let output = gather_metrics();
        assert!(output.contains("indexer_reorg_events_total"));
        assert!(output.contains("indexer_reorg_depth"));
    }

    #[test]
    fn timer_elapsed_is_monotonic() {
        let timer = Timer::new();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(timer.elapsed_secs() >= 0.005);
    }
}

//! Metrics collection and export module

use prometheus::{
    Encoder, Gauge, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder,
};
use std::time::Instant;

/// Global metrics registry
pub struct Metrics {
    registry: Registry,

    // Cycles
    pub cycles_total: IntCounter,
    pub cycles_succeeded: IntCounter,
    pub cycles_failed: IntCounter,
    pub cycles_rejected: IntCounter,

    // Fetch
    pub fetch_attempts: IntCounter,
    pub fetch_failures: IntCounter,

    // Submission
    pub submit_attempts: IntCounter,
    pub submissions_confirmed: IntCounter,
    pub submissions_reverted: IntCounter,
    pub submissions_abandoned: IntCounter,

    pub circuit_rejections: IntCounter,

    // Gauges
    pub last_index_value: Gauge,
    pub last_rate_bps: IntGauge,
    pub cycle_in_flight: IntGauge,

    // Histograms
    pub fetch_latency: Histogram,
    pub submit_latency: Histogram,
    pub cycle_latency: Histogram,
}

impl Metrics {
    /// Create new metrics instance
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let cycles_total = IntCounter::with_opts(Opts::new(
            "oracle_cycles_total",
            "Total number of update cycles started",
        ))?;

        let cycles_succeeded = IntCounter::with_opts(Opts::new(
            "oracle_cycles_succeeded_total",
            "Cycles that ended with a confirmed or disabled submission",
        ))?;

        let cycles_failed =
            IntCounter::with_opts(Opts::new("oracle_cycles_failed_total", "Cycles that failed"))?;

        let cycles_rejected = IntCounter::with_opts(Opts::new(
            "oracle_cycles_rejected_total",
            "Manual cycles rejected because another cycle was running",
        ))?;

        let fetch_attempts = IntCounter::with_opts(Opts::new(
            "oracle_fetch_attempts_total",
            "HTTP requests issued for the index page",
        ))?;

        let fetch_failures = IntCounter::with_opts(Opts::new(
            "oracle_fetch_failures_total",
            "HTTP requests that failed",
        ))?;

        let submit_attempts = IntCounter::with_opts(Opts::new(
            "oracle_submit_attempts_total",
            "Fee update transactions attempted",
        ))?;

        let submissions_confirmed = IntCounter::with_opts(Opts::new(
            "oracle_submissions_confirmed_total",
            "Fee updates confirmed on chain",
        ))?;

        let submissions_reverted = IntCounter::with_opts(Opts::new(
            "oracle_submissions_reverted_total",
            "Fee updates reverted on chain",
        ))?;

        let submissions_abandoned = IntCounter::with_opts(Opts::new(
            "oracle_submissions_abandoned_total",
            "Fee updates abandoned before confirmation",
        ))?;

        let circuit_rejections = IntCounter::with_opts(Opts::new(
            "oracle_circuit_rejections_total",
            "Calls rejected by an open circuit breaker",
        ))?;

        let last_index_value = Gauge::with_opts(Opts::new(
            "oracle_last_index_value",
            "Most recently extracted index value",
        ))?;

        let last_rate_bps = IntGauge::with_opts(Opts::new(
            "oracle_last_rate_bps",
            "Most recently computed fee rate in basis points",
        ))?;

        let cycle_in_flight = IntGauge::with_opts(Opts::new(
            "oracle_cycle_in_flight",
            "1 while an update cycle is running",
        ))?;

        let fetch_latency = Histogram::with_opts(
            HistogramOpts::new("oracle_fetch_latency_seconds", "Index fetch latency incl. retries")
                .buckets(vec![1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]),
        )?;

        let submit_latency = Histogram::with_opts(
            HistogramOpts::new("oracle_submit_latency_seconds", "Submission latency incl. confirmation")
                .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 180.0, 600.0]),
        )?;

        let cycle_latency = Histogram::with_opts(
            HistogramOpts::new("oracle_cycle_latency_seconds", "End-to-end cycle latency")
                .buckets(vec![5.0, 15.0, 30.0, 60.0, 180.0, 600.0, 1800.0]),
        )?;

        registry.register(Box::new(cycles_total.clone()))?;
        registry.register(Box::new(cycles_succeeded.clone()))?;
        registry.register(Box::new(cycles_failed.clone()))?;
        registry.register(Box::new(cycles_rejected.clone()))?;
        registry.register(Box::new(fetch_attempts.clone()))?;
        registry.register(Box::new(fetch_failures.clone()))?;
        registry.register(Box::new(submit_attempts.clone()))?;
        registry.register(Box::new(submissions_confirmed.clone()))?;
        registry.register(Box::new(submissions_reverted.clone()))?;
        registry.register(Box::new(submissions_abandoned.clone()))?;
        registry.register(Box::new(circuit_rejections.clone()))?;
        registry.register(Box::new(last_index_value.clone()))?;
        registry.register(Box::new(last_rate_bps.clone()))?;
        registry.register(Box::new(cycle_in_flight.clone()))?;
        registry.register(Box::new(fetch_latency.clone()))?;
        registry.register(Box::new(submit_latency.clone()))?;
        registry.register(Box::new(cycle_latency.clone()))?;

        Ok(Self {
            registry,
            cycles_total,
            cycles_succeeded,
            cycles_failed,
            cycles_rejected,
            fetch_attempts,
            fetch_failures,
            submit_attempts,
            submissions_confirmed,
            submissions_reverted,
            submissions_abandoned,
            circuit_rejections,
            last_index_value,
            last_rate_bps,
            cycle_in_flight,
            fetch_latency,
            submit_latency,
            cycle_latency,
        })
    }

    /// Get the registry for exporting
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Prometheus text exposition of everything registered
    pub fn render(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Global metrics instance
pub fn metrics() -> &'static Metrics {
    static METRICS: once_cell::sync::Lazy<Metrics> =
        once_cell::sync::Lazy::new(|| Metrics::new().expect("Failed to initialize metrics"));
    &METRICS
}

/// Timer helper for measuring operation duration
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn observe_duration(&self, histogram: &Histogram) {
        histogram.observe(self.start.elapsed().as_secs_f64());
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

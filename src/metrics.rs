use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
    TextEncoder,
};

/// Metrics registry for the API scraped by Prometheus.
#[derive(Clone)]
pub struct AppMetrics {
    registry: Arc<Registry>,
    datasets: DatasetMetrics,
    streams: StreamMetrics,
}

impl AppMetrics {
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new_custom(Some("bessmon".into()), None)?);

        let datasets = DatasetMetrics::register(&registry)?;
        let streams = StreamMetrics::register(&registry)?;

        Ok(Self {
            registry,
            datasets,
            streams,
        })
    }

    /// Record one dataset build and how long it took.
    pub fn observe_build(&self, mode: &str, duration: Duration, success: bool) {
        self.datasets
            .build_duration
            .with_label_values(&[mode])
            .observe(duration.as_secs_f64());
        self.datasets
            .builds_total
            .with_label_values(&[if success { "ok" } else { "error" }])
            .inc();
    }

    pub fn record_cache_lookup(&self, hit: bool) {
        self.datasets
            .cache_lookups
            .with_label_values(&[if hit { "hit" } else { "miss" }])
            .inc();
    }

    /// Count a metric file that contributed nothing to a build.
    pub fn record_load_failure(&self, reason: &str) {
        self.datasets
            .load_failures
            .with_label_values(&[reason])
            .inc();
    }

    pub fn set_unified_rows(&self, device_id: &str, rows: usize) {
        self.datasets
            .unified_rows
            .with_label_values(&[device_id])
            .set(rows as i64);
    }

    pub fn inc_stream_row(&self, device_id: &str) {
        self.streams
            .rows_total
            .with_label_values(&[device_id])
            .inc();
    }

    /// Mark a stream as open until the returned guard is dropped.
    pub fn stream_opened(&self) -> ActiveStreamGuard {
        self.streams.active.inc();
        ActiveStreamGuard {
            gauge: self.streams.active.clone(),
        }
    }

    pub fn active_streams(&self) -> i64 {
        self.streams.active.get()
    }

    pub fn encode(&self) -> Result<String> {
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Decrements the active stream gauge on drop.
pub struct ActiveStreamGuard {
    gauge: IntGauge,
}

impl Drop for ActiveStreamGuard {
    fn drop(&mut self) {
        self.gauge.dec();
    }
}

#[derive(Clone)]
struct DatasetMetrics {
    builds_total: IntCounterVec,
    build_duration: HistogramVec,
    cache_lookups: IntCounterVec,
    load_failures: IntCounterVec,
    unified_rows: IntGaugeVec,
}

impl DatasetMetrics {
    fn register(registry: &Registry) -> Result<Self> {
        let builds_total = IntCounterVec::new(
            Opts::new("dataset_builds_total", "Unified dataset builds by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(builds_total.clone()))?;

        let build_duration = HistogramVec::new(
            HistogramOpts::new(
                "dataset_build_duration_seconds",
                "Time spent building a unified dataset",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
            &["mode"],
        )?;
        registry.register(Box::new(build_duration.clone()))?;

        let cache_lookups = IntCounterVec::new(
            Opts::new("dataset_cache_lookups_total", "Dataset cache lookups by result"),
            &["result"],
        )?;
        registry.register(Box::new(cache_lookups.clone()))?;

        let load_failures = IntCounterVec::new(
            Opts::new(
                "metric_load_failures_total",
                "Metric files skipped during a build, by reason",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(load_failures.clone()))?;

        let unified_rows = IntGaugeVec::new(
            Opts::new("unified_rows", "Rows in the latest unified dataset per device"),
            &["device"],
        )?;
        registry.register(Box::new(unified_rows.clone()))?;

        Ok(Self {
            builds_total,
            build_duration,
            cache_lookups,
            load_failures,
            unified_rows,
        })
    }
}

#[derive(Clone)]
struct StreamMetrics {
    rows_total: IntCounterVec,
    active: IntGauge,
}

impl StreamMetrics {
    fn register(registry: &Registry) -> Result<Self> {
        let rows_total = IntCounterVec::new(
            Opts::new("stream_rows_total", "Rows pushed over server-sent event streams"),
            &["device"],
        )?;
        registry.register(Box::new(rows_total.clone()))?;

        let active = IntGauge::with_opts(Opts::new("active_streams", "Open row streams"))?;
        registry.register(Box::new(active.clone()))?;

        Ok(Self { rows_total, active })
    }
}

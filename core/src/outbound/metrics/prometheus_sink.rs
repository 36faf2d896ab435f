//! Prometheus export for ledger and importer metrics (`§6`).
//!
//! This adapter exports append, verify, and importer outcomes to Prometheus
//! via the `prometheus` crate. Metrics are registered with a provided
//! registry and exposed via the host binary's `/metrics` endpoint.

use async_trait::async_trait;
use prometheus::{CounterVec, HistogramVec, Opts, Registry};

use crate::metrics::MetricsSink;

/// Prometheus-backed implementation of [`MetricsSink`].
///
/// # Metric Specification
///
/// - `ledger_events_total{outcome}` — counter, `outcome` one of `applied`,
///   `idempotent_reuse`, `ordinal_conflict`, `hash_mismatch`.
/// - `ledger_event_apply_latency_ms` — histogram of per-append wall time.
/// - `ledger_importer_events_total{name}` — counter, `name` the importer
///   counter identifier (e.g. `importer.entity.created`).
/// - `ledger_importer_run_duration_ms` — histogram of per-run wall time.
pub struct PrometheusMetricsSink {
    events_total: CounterVec,
    apply_latency_ms: HistogramVec,
    importer_events_total: CounterVec,
    importer_duration_ms: HistogramVec,
}

impl PrometheusMetricsSink {
    /// Create and register metrics with the given registry.
    ///
    /// # Errors
    ///
    /// Returns an error if a metric of the same name is already registered.
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let events_total = CounterVec::new(
            Opts::new("ledger_events_total", "Event append outcomes by kind"),
            &["outcome"],
        )?;
        let apply_latency_ms = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "ledger_event_apply_latency_ms",
                "Wall-clock time for one append, including retries",
            ),
            &[],
        )?;
        let importer_events_total = CounterVec::new(
            Opts::new(
                "ledger_importer_events_total",
                "Importer phase outcomes by counter name",
            ),
            &["name"],
        )?;
        let importer_duration_ms = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "ledger_importer_run_duration_ms",
                "Wall-clock time for one import run",
            ),
            &[],
        )?;

        registry.register(Box::new(events_total.clone()))?;
        registry.register(Box::new(apply_latency_ms.clone()))?;
        registry.register(Box::new(importer_events_total.clone()))?;
        registry.register(Box::new(importer_duration_ms.clone()))?;

        Ok(Self {
            events_total,
            apply_latency_ms,
            importer_events_total,
            importer_duration_ms,
        })
    }
}

#[async_trait]
impl MetricsSink for PrometheusMetricsSink {
    async fn incr_events_applied(&self) {
        self.events_total.with_label_values(&["applied"]).inc();
    }

    async fn incr_events_idempotent_reuse(&self) {
        self.events_total
            .with_label_values(&["idempotent_reuse"])
            .inc();
    }

    async fn incr_events_ordinal_conflict(&self) {
        self.events_total
            .with_label_values(&["ordinal_conflict"])
            .inc();
    }

    async fn incr_events_hash_mismatch(&self) {
        self.events_total
            .with_label_values(&["hash_mismatch"])
            .inc();
    }

    #[expect(
        clippy::cast_precision_loss,
        reason = "millisecond latencies fit comfortably in f64's exact-integer range"
    )]
    async fn record_apply_latency_ms(&self, millis: u64) {
        self.apply_latency_ms
            .with_label_values(&[])
            .observe(millis as f64);
    }

    async fn incr_importer_counter(&self, name: &'static str) {
        self.importer_events_total.with_label_values(&[name]).inc();
    }

    #[expect(
        clippy::cast_precision_loss,
        reason = "millisecond latencies fit comfortably in f64's exact-integer range"
    )]
    async fn record_importer_duration_ms(&self, millis: u64) {
        self.importer_duration_ms
            .with_label_values(&[])
            .observe(millis as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_metrics() -> (Registry, PrometheusMetricsSink) {
        let registry = Registry::new();
        let metrics =
            PrometheusMetricsSink::new(&registry).expect("metric registration should succeed");
        (registry, metrics)
    }

    #[tokio::test]
    async fn registers_every_metric_with_registry() {
        let (registry, metrics) = make_metrics();
        metrics.incr_events_applied().await;

        let families = registry.gather();
        let names: Vec<&str> = families.iter().map(prometheus::proto::MetricFamily::name).collect();
        assert!(names.contains(&"ledger_events_total"));
        assert!(names.contains(&"ledger_event_apply_latency_ms"));
        assert!(names.contains(&"ledger_importer_events_total"));
        assert!(names.contains(&"ledger_importer_run_duration_ms"));
    }

    #[tokio::test]
    async fn increments_events_total_by_outcome_label() {
        let (_registry, metrics) = make_metrics();
        metrics.incr_events_applied().await;
        metrics.incr_events_applied().await;
        metrics.incr_events_idempotent_reuse().await;

        assert_eq!(metrics.events_total.with_label_values(&["applied"]).get() as u64, 2);
        assert_eq!(
            metrics
                .events_total
                .with_label_values(&["idempotent_reuse"])
                .get() as u64,
            1
        );
    }

    #[tokio::test]
    async fn records_importer_counters_by_name() {
        let (_registry, metrics) = make_metrics();
        metrics.incr_importer_counter("importer.entity.created").await;

        let counter = metrics
            .importer_events_total
            .with_label_values(&["importer.entity.created"]);
        assert_eq!(counter.get() as u64, 1);
    }

    #[tokio::test]
    async fn records_latency_histograms() {
        let (_registry, metrics) = make_metrics();
        metrics.record_apply_latency_ms(42).await;
        metrics.record_importer_duration_ms(1200).await;

        assert_eq!(metrics.apply_latency_ms.with_label_values(&[]).get_sample_count(), 1);
        assert_eq!(
            metrics
                .importer_duration_ms
                .with_label_values(&[])
                .get_sample_count(),
            1
        );
    }
}

//! Prometheus adapter for [`crate::metrics::MetricsSink`], gated behind the
//! `metrics` feature.

mod prometheus_sink;

pub use prometheus_sink::PrometheusMetricsSink;

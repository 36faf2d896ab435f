//! Metrics port (`§6` ADDED).
//!
//! Mirrors `domain::ports::IdempotencyMetrics` from the teacher: a small
//! async trait recording outcomes, with a Prometheus-backed adapter gated
//! behind the `metrics` feature and an in-memory default for tests and for
//! deployments that don't scrape Prometheus.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics recorded by the append coordinator, verifier, and importer.
///
/// Each method corresponds to one named counter or histogram in `§6`.
/// Implementations must not fail the caller's operation if recording fails;
/// adapters that talk to an external system (e.g. a push gateway) should log
/// and swallow errors internally rather than propagate them here.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    /// `events.applied`: one event was durably appended.
    async fn incr_events_applied(&self);
    /// `events.idempotent_reuse`: an append retried with a previously-seen
    /// idempotency key and returned the existing event.
    async fn incr_events_idempotent_reuse(&self);
    /// `events.ordinal_conflict`: an append lost a race on `replay_ordinal`
    /// and retried.
    async fn incr_events_ordinal_conflict(&self);
    /// `events.hash_mismatch`: the verifier found a broken chain link.
    async fn incr_events_hash_mismatch(&self);
    /// `event.apply.latency_ms`: wall-clock time for one append, including
    /// retries.
    async fn record_apply_latency_ms(&self, millis: u64);
    /// A named importer counter (`importer.manifest.validated`,
    /// `importer.entity.created`, `importer.entity.skipped_idempotent`,
    /// and so on; see `SPEC_FULL.md` `§6`).
    async fn incr_importer_counter(&self, name: &'static str);
    /// `importer.run.duration_ms`: wall-clock time for one import run.
    async fn record_importer_duration_ms(&self, millis: u64);
}

/// In-memory [`MetricsSink`] backed by atomics, for tests and for running
/// without a Prometheus registry.
#[derive(Debug, Default)]
pub struct InMemoryMetricsSink {
    events_applied: AtomicU64,
    events_idempotent_reuse: AtomicU64,
    events_ordinal_conflict: AtomicU64,
    events_hash_mismatch: AtomicU64,
}

impl InMemoryMetricsSink {
    /// Create a sink with every counter at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of `events.applied`.
    #[must_use]
    pub fn events_applied(&self) -> u64 {
        self.events_applied.load(Ordering::Relaxed)
    }

    /// Current value of `events.idempotent_reuse`.
    #[must_use]
    pub fn events_idempotent_reuse(&self) -> u64 {
        self.events_idempotent_reuse.load(Ordering::Relaxed)
    }

    /// Current value of `events.ordinal_conflict`.
    #[must_use]
    pub fn events_ordinal_conflict(&self) -> u64 {
        self.events_ordinal_conflict.load(Ordering::Relaxed)
    }

    /// Current value of `events.hash_mismatch`.
    #[must_use]
    pub fn events_hash_mismatch(&self) -> u64 {
        self.events_hash_mismatch.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl MetricsSink for InMemoryMetricsSink {
    async fn incr_events_applied(&self) {
        self.events_applied.fetch_add(1, Ordering::Relaxed);
    }

    async fn incr_events_idempotent_reuse(&self) {
        self.events_idempotent_reuse.fetch_add(1, Ordering::Relaxed);
    }

    async fn incr_events_ordinal_conflict(&self) {
        self.events_ordinal_conflict.fetch_add(1, Ordering::Relaxed);
    }

    async fn incr_events_hash_mismatch(&self) {
        self.events_hash_mismatch.fetch_add(1, Ordering::Relaxed);
    }

    async fn record_apply_latency_ms(&self, _millis: u64) {}

    async fn incr_importer_counter(&self, _name: &'static str) {}

    async fn record_importer_duration_ms(&self, _millis: u64) {}
}

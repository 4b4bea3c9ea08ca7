//! Metrics for [super::Orchestrator].

use commonware_runtime::Metrics as RuntimeMetrics;
use prometheus_client::metrics::{counter::Counter, gauge::Gauge};

/// Metrics for [super::Orchestrator].
#[derive(Clone, Default)]
pub struct Metrics {
    /// Number of proof-construction requests.
    pub proofs_requested: Counter,
    /// Number of sessions observed expired.
    pub sessions_expired: Counter,
    /// Number of proofs rebuilt after the gateway rejected them.
    pub proofs_replayed: Counter,
    /// Number of payloads executed on destination gateways.
    pub messages_executed: Counter,
    /// Number of governance proposals executed.
    pub proposals_executed: Counter,
    /// Current number of pipelines in flight.
    pub inflight: Gauge,
}

impl Metrics {
    /// Create and register metrics with the given context.
    ///
    /// Metric names will be prefixed with the context's label.
    pub fn init<E: RuntimeMetrics>(context: &E) -> Self {
        let metrics = Self::default();
        context.register(
            "proofs_requested",
            "Number of proof-construction requests",
            metrics.proofs_requested.clone(),
        );
        context.register(
            "sessions_expired",
            "Number of sessions observed expired",
            metrics.sessions_expired.clone(),
        );
        context.register(
            "proofs_replayed",
            "Number of proofs rebuilt after the gateway rejected them",
            metrics.proofs_replayed.clone(),
        );
        context.register(
            "messages_executed",
            "Number of payloads executed on destination gateways",
            metrics.messages_executed.clone(),
        );
        context.register(
            "proposals_executed",
            "Number of governance proposals executed",
            metrics.proposals_executed.clone(),
        );
        context.register(
            "inflight",
            "Current number of pipelines in flight",
            metrics.inflight.clone(),
        );
        metrics
    }
}

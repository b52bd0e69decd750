//! Metrics helpers for topogate.
//!
//! Thin wrappers around the `metrics` crate macros. The binary exports them
//! through [`install_prometheus_exporter`]; an embedding application may
//! install any other recorder instead.
//!
//! Provided metrics:
//! * `topogate_reconciliations_total` (counter)
//! * `topogate_reconcile_duration_seconds` (histogram)
//! * `topogate_topology_events_total` (counter, label `kind`)
//! * `topogate_topology_load_failures_total` (counter, label `topology`)
//! * `topogate_listener_failures_total` (counter)
//! * `topogate_published_topologies` (gauge)
//! * `topogate_requests_total` (counter, labels `topology`, `status`)
//! * `topogate_request_duration_seconds` (histogram, label `topology`)
use std::{
    net::SocketAddr,
    time::{Duration, Instant},
};

use eyre::WrapErr;
use metrics::{
    Unit, counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::Lazy;

use crate::core::reconcile::TopologyEventKind;

pub const RECONCILIATIONS_TOTAL: &str = "topogate_reconciliations_total";
pub const RECONCILE_DURATION_SECONDS: &str = "topogate_reconcile_duration_seconds";
pub const TOPOLOGY_EVENTS_TOTAL: &str = "topogate_topology_events_total";
pub const TOPOLOGY_LOAD_FAILURES_TOTAL: &str = "topogate_topology_load_failures_total";
pub const LISTENER_FAILURES_TOTAL: &str = "topogate_listener_failures_total";
pub const PUBLISHED_TOPOLOGIES: &str = "topogate_published_topologies";
pub const REQUESTS_TOTAL: &str = "topogate_requests_total";
pub const REQUEST_DURATION_SECONDS: &str = "topogate_request_duration_seconds";

static DESCRIPTIONS: Lazy<()> = Lazy::new(|| {
    describe_counter!(
        RECONCILIATIONS_TOTAL,
        Unit::Count,
        "Completed topology reconciliation passes."
    );
    describe_histogram!(
        RECONCILE_DURATION_SECONDS,
        Unit::Seconds,
        "Duration of topology reconciliation passes."
    );
    describe_counter!(
        TOPOLOGY_EVENTS_TOTAL,
        Unit::Count,
        "Topology change events published, by kind."
    );
    describe_counter!(
        TOPOLOGY_LOAD_FAILURES_TOTAL,
        Unit::Count,
        "Descriptor files that could not be loaded."
    );
    describe_counter!(
        LISTENER_FAILURES_TOTAL,
        Unit::Count,
        "Topology listeners that failed to handle an event batch."
    );
    describe_gauge!(
        PUBLISHED_TOPOLOGIES,
        "Number of topologies in the published snapshot."
    );
    describe_counter!(
        REQUESTS_TOTAL,
        Unit::Count,
        "Requests dispatched by the gateway."
    );
    describe_histogram!(
        REQUEST_DURATION_SECONDS,
        Unit::Seconds,
        "Latency of requests dispatched by the gateway."
    );
});

/// Register metric descriptions (idempotent).
pub fn init_metrics() -> eyre::Result<()> {
    Lazy::force(&DESCRIPTIONS);
    tracing::debug!("Metric descriptions registered");
    Ok(())
}

/// Install the global recorder and serve `/metrics` for Prometheus on `addr`.
/// Must be called from within a Tokio runtime.
pub fn install_prometheus_exporter(addr: SocketAddr) -> eyre::Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .wrap_err_with(|| format!("Failed to install Prometheus exporter on {addr}"))?;
    tracing::info!("Prometheus metrics exported on {}", addr);
    Ok(())
}

/// Record one finished reconciliation pass.
pub fn record_reconcile(duration: Duration, published: usize) {
    counter!(RECONCILIATIONS_TOTAL).increment(1);
    histogram!(RECONCILE_DURATION_SECONDS).record(duration.as_secs_f64());
    gauge!(PUBLISHED_TOPOLOGIES).set(published as f64);
}

pub fn increment_topology_event(kind: TopologyEventKind) {
    counter!(TOPOLOGY_EVENTS_TOTAL, "kind" => kind.to_string()).increment(1);
}

pub fn increment_load_failure(topology: &str) {
    counter!(TOPOLOGY_LOAD_FAILURES_TOTAL, "topology" => topology.to_string()).increment(1);
}

pub fn increment_listener_failure() {
    counter!(LISTENER_FAILURES_TOTAL).increment(1);
}

pub fn increment_request_total(topology: &str, status: u16) {
    counter!(
        REQUESTS_TOTAL,
        "topology" => topology.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// RAII helper measuring dispatch duration; records on drop.
pub struct RequestTimer {
    start: Instant,
    topology: String,
}

impl RequestTimer {
    pub fn new(topology: &str) -> Self {
        Self {
            start: Instant::now(),
            topology: topology.to_string(),
        }
    }
}

impl Drop for RequestTimer {
    fn drop(&mut self) {
        histogram!(REQUEST_DURATION_SECONDS, "topology" => self.topology.clone())
            .record(self.start.elapsed().as_secs_f64());
    }
}

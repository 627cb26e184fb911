//! Telemetry initialization: structured logging and Prometheus metrics

use crate::config::Environment;
use metrics::describe_counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialise logging and metrics.
///
/// Production logs JSON with flattened event fields; everything else gets the
/// human-readable formatter. Returns the Prometheus handle the host exposes
/// on its `/metrics` endpoint.
pub fn init(environment: Environment) -> PrometheusHandle {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "verdict_core=info".into());

    let handle = install_prometheus_recorder();
    describe_metrics();

    let registry = tracing_subscriber::registry().with(env_filter);
    if environment.is_production() {
        let fmt_layer = tracing_subscriber::fmt::layer().json().flatten_event(true);
        registry.with(fmt_layer).init();
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer();
        registry.with(fmt_layer).init();
    }

    handle
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
pub fn install_prometheus_recorder() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Register metric descriptions so Prometheus output carries HELP/TYPE lines
/// from startup rather than after first use.
pub fn describe_metrics() {
    describe_counter!(
        "verdict_authz_decisions_total",
        "Authorization decisions by outcome"
    );
    describe_counter!(
        "verdict_authz_failures_total",
        "Authorization attempts that failed internally and were denied"
    );

    describe_counter!("verdict_cache_hits_total", "Permission cache hits");
    describe_counter!("verdict_cache_misses_total", "Permission cache misses");
    describe_counter!(
        "verdict_cache_errors_total",
        "Permission cache operations that failed and were skipped"
    );

    describe_counter!(
        "verdict_permission_registrations_total",
        "Permission registration batches applied, by owner kind"
    );

    describe_counter!(
        "verdict_rate_guard_throttled_total",
        "Mutations rejected by the rate guard"
    );
    describe_counter!(
        "verdict_rate_guard_unavailable_total",
        "Rate guard checks that failed open because Redis was unreachable"
    );
}

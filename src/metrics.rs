use metrics::{counter, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus exporter and register all application metrics.
/// Returns a `PrometheusHandle` whose `render()` method produces the
/// text/plain Prometheus scrape payload.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    register();
    Ok(handle)
}

/// Handle backed by a recorder that is not installed globally. Macros called
/// elsewhere do not reach it; used where a scrape endpoint must exist anyway.
pub fn detached_handle() -> PrometheusHandle {
    PrometheusBuilder::new().build_recorder().handle()
}

// Pre-register so every series appears before its first increment.
fn register() {
    counter!("orders_placed").absolute(0);
    counter!("orders_failed").absolute(0);
    counter!("reconcile_runs").absolute(0);
    counter!("reconcile_failures").absolute(0);

    gauge!("open_positions").set(0.0);
    gauge!("pending_suggestions").set(0.0);
}

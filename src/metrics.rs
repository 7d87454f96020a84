use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus exporter and register all application metrics.
/// Returns a `PrometheusHandle` whose `render()` method produces the
/// text/plain Prometheus scrape payload.
pub fn init_metrics() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(handle)
}

/// Pre-register counters so they appear even before the first increment.
pub fn register_metrics() {
    counter!("signals_received").absolute(0);
    counter!("signals_rejected").absolute(0);
    counter!("orders_filled").absolute(0);
    counter!("orders_failed").absolute(0);
    counter!("orders_cancelled").absolute(0);
    counter!("positions_opened").absolute(0);
    counter!("positions_closed").absolute(0);
    counter!("adapter_retries").absolute(0);

    // Histogram is lazily created on first record; force creation.
    histogram!("dispatch_latency_seconds").record(0.0);
}

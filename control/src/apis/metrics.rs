//! Controller metrics

use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};

lazy_static! {
    /// Controller metrics registry
    pub static ref CONTROLLER_METRICS_REGISTRY: Registry = Registry::new();

    /// Ingress reconciliation duration
    static ref INGRESS_RECONCILIATION_DURATION: HistogramVec = {
        let opts = HistogramOpts::new(
            "ingress_reconciliation_duration_seconds",
            "Ingress reconciliation duration in seconds",
        );
        let histogram = HistogramVec::new(opts, &["ingress", "namespace"])
            .expect("Failed to create histogram");
        CONTROLLER_METRICS_REGISTRY
            .register(Box::new(histogram.clone()))
            .expect("Failed to register histogram");
        histogram
    };

    /// Ingress reconciliations total
    static ref INGRESS_RECONCILIATIONS_TOTAL: IntCounterVec = {
        let opts = Opts::new(
            "ingress_reconciliations_total",
            "Total number of ingress reconciliations",
        );
        let counter = IntCounterVec::new(opts, &["ingress", "namespace", "result"])
            .expect("Failed to create counter");
        CONTROLLER_METRICS_REGISTRY
            .register(Box::new(counter.clone()))
            .expect("Failed to register counter");
        counter
    };

    /// Admin API pushes total
    static ref CONFIG_PUSHES_TOTAL: IntCounterVec = {
        let opts = Opts::new(
            "config_pushes_total",
            "Total number of configuration pushes to the proxy admin API",
        );
        let counter = IntCounterVec::new(opts, &["server", "result"])
            .expect("Failed to create counter");
        CONTROLLER_METRICS_REGISTRY
            .register(Box::new(counter.clone()))
            .expect("Failed to register counter");
        counter
    };

    /// Routes currently in each route table
    static ref ROUTES: IntGaugeVec = {
        let opts = Opts::new("caddy_ingress_routes", "Routes in the server route table");
        let gauge = IntGaugeVec::new(opts, &["server"]).expect("Failed to create gauge");
        CONTROLLER_METRICS_REGISTRY
            .register(Box::new(gauge.clone()))
            .expect("Failed to register gauge");
        gauge
    };
}

/// Record Ingress reconciliation
pub fn record_ingress_reconciliation(
    ingress: &str,
    namespace: &str,
    duration_secs: f64,
    result: &str,
) {
    INGRESS_RECONCILIATION_DURATION
        .with_label_values(&[ingress, namespace])
        .observe(duration_secs);

    INGRESS_RECONCILIATIONS_TOTAL
        .with_label_values(&[ingress, namespace, result])
        .inc();
}

/// Record a push to the admin API
pub fn record_config_push(server: &str, result: &str) {
    CONFIG_PUSHES_TOTAL.with_label_values(&[server, result]).inc();
}

/// Update the route count gauge of a server
pub fn set_route_count(server: &str, count: usize) {
    ROUTES
        .with_label_values(&[server])
        .set(i64::try_from(count).unwrap_or(i64::MAX));
}

/// Gather controller metrics
pub fn gather_controller_metrics() -> Result<String, String> {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    let metric_families = CONTROLLER_METRICS_REGISTRY.gather();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| format!("Failed to encode metrics: {}", e))?;

    String::from_utf8(buffer).map_err(|e| format!("Failed to convert to UTF-8: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconciliation_metrics_recorded() {
        record_ingress_reconciliation("web", "default", 0.012, "success");

        let metrics = gather_controller_metrics().expect("Should gather metrics");
        assert!(metrics.contains("ingress_reconciliations_total"));
        assert!(metrics.contains("ingress_reconciliation_duration_seconds"));
    }

    #[test]
    fn test_push_and_route_metrics_recorded() {
        record_config_push("metrics-test", "success");
        set_route_count("metrics-test", 3);

        let metrics = gather_controller_metrics().expect("Should gather metrics");
        assert!(metrics.contains("config_pushes_total"));
        assert!(metrics.contains(r#"caddy_ingress_routes{server="metrics-test"} 3"#));
    }
}

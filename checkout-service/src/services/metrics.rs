use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use prometheus::{IntCounterVec, Opts, Registry};
use std::sync::OnceLock;

pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
pub static PROMETHEUS_REGISTRY: OnceLock<Registry> = OnceLock::new();
pub static COUPON_APPLICATIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static WEBHOOK_EVENTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static GATEWAY_REQUESTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

pub fn init_metrics() -> anyhow::Result<()> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    if METRICS_HANDLE.set(handle).is_err() {
        anyhow::bail!("metrics recorder already initialized");
    }

    let registry = Registry::new();

    // Outcome is "applied" or the rejection reason
    let coupon_counter = IntCounterVec::new(
        Opts::new(
            "coupon_applications_total",
            "Coupon application attempts by outcome",
        ),
        &["outcome"],
    )?;

    let webhook_counter = IntCounterVec::new(
        Opts::new(
            "webhook_events_total",
            "Inbound gateway notifications by outcome",
        ),
        &["outcome"],
    )?;

    let gateway_counter = IntCounterVec::new(
        Opts::new(
            "gateway_requests_total",
            "Outbound payment gateway calls by operation and outcome",
        ),
        &["operation", "outcome"],
    )?;

    registry.register(Box::new(coupon_counter.clone()))?;
    registry.register(Box::new(webhook_counter.clone()))?;
    registry.register(Box::new(gateway_counter.clone()))?;

    let _ = PROMETHEUS_REGISTRY.set(registry);
    let _ = COUPON_APPLICATIONS_TOTAL.set(coupon_counter);
    let _ = WEBHOOK_EVENTS_TOTAL.set(webhook_counter);
    let _ = GATEWAY_REQUESTS_TOTAL.set(gateway_counter);

    Ok(())
}

pub fn get_metrics() -> String {
    let mut output = METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized\n".to_string());

    if let Some(registry) = PROMETHEUS_REGISTRY.get() {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).ok();
        if let Ok(custom_metrics) = String::from_utf8(buffer) {
            output.push_str(&custom_metrics);
        }
    }

    output
}

pub fn record_coupon_application(outcome: &str) {
    if let Some(counter) = COUPON_APPLICATIONS_TOTAL.get() {
        counter.with_label_values(&[outcome]).inc();
    }
}

pub fn record_webhook_event(outcome: &str) {
    if let Some(counter) = WEBHOOK_EVENTS_TOTAL.get() {
        counter.with_label_values(&[outcome]).inc();
    }
}

pub fn record_gateway_call(operation: &str, outcome: &str) {
    if let Some(counter) = GATEWAY_REQUESTS_TOTAL.get() {
        counter.with_label_values(&[operation, outcome]).inc();
    }
}

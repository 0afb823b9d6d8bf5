use anyhow::{Context, Result};
use metrics::{describe_counter, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder. Only one per process.
    pub fn init(rate_limit_per_minute: u32) -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;

        describe_counter!("api_rate_limited_total", "Requests rejected with 429.");
        describe_counter!("webhook_delivered_total", "Webhook events delivered.");
        describe_counter!("webhook_failed_total", "Webhook events abandoned after retries.");
        describe_counter!("scheduler_ticks_total", "Scheduler ticks by outcome.");
        describe_counter!("translate_provider_failures_total", "Translation provider failures.");

        // Static gauge with the configured request rate
        gauge!("api_rate_limit_per_minute").set(f64::from(rate_limit_per_minute));

        Ok(Self { handle })
    }
}

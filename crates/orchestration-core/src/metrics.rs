use anyhow::Result;
use once_cell::sync::OnceCell;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::{global, KeyValue};
use tracing::info;

struct OrchestrationMetrics {
    executor_outcomes: Counter<u64>,
    task_duration_ms: Histogram<f64>,
    connector_evictions: Counter<u64>,
    watcher_timeouts: Counter<u64>,
}

static METRICS: OnceCell<OrchestrationMetrics> = OnceCell::new();

fn handles() -> &'static OrchestrationMetrics {
    METRICS.get_or_init(|| {
        let meter: Meter = global::meter("netunicorn.orchestration");
        OrchestrationMetrics {
            executor_outcomes: meter
                .u64_counter("executor_outcomes_total")
                .with_description("Executor completions by status")
                .init(),
            task_duration_ms: meter
                .f64_histogram("task_duration_ms")
                .with_description("Task process runtime in milliseconds")
                .init(),
            connector_evictions: meter
                .u64_counter("connector_evictions_total")
                .with_description("Number of connectors evicted after a thrown fault")
                .init(),
            watcher_timeouts: meter
                .u64_counter("watcher_timeouts_total")
                .with_description("Number of executors declared dead by the watcher")
                .init(),
        }
    })
}

/// Hint to operators that OTEL metrics export can be configured externally.
pub fn init_metrics_from_env(service_name: &str) -> Result<()> {
    if std::env::var("NETUNICORN_OTEL_METRICS_ENDPOINT").is_ok() {
        info!(
            target = "telemetry",
            "NETUNICORN_OTEL_METRICS_ENDPOINT detected for {service_name}. Configure an OTLP meter provider in your deployment to export metrics."
        );
    }
    Ok(())
}

pub fn record_executor_outcome(status: &str) {
    handles()
        .executor_outcomes
        .add(1, &[KeyValue::new("status", status.to_string())]);
}

pub fn record_task_duration(duration_ms: u64, status: &str) {
    handles().task_duration_ms.record(
        duration_ms as f64,
        &[KeyValue::new("status", status.to_string())],
    );
}

pub fn record_connector_eviction(connector: &str) {
    handles()
        .connector_evictions
        .add(1, &[KeyValue::new("connector", connector.to_string())]);
}

pub fn record_watcher_timeout(connector: &str) {
    handles()
        .watcher_timeouts
        .add(1, &[KeyValue::new("connector", connector.to_string())]);
}

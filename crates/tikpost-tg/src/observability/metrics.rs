use super::GLOBAL_LABELS;
use crate::config::from_env_or_panic;
use crate::prelude::*;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use serde::Deserialize;
use std::time::Duration;

/// Histogram buckets to measure the distribution of task durations in seconds.
/// Resolving a link through a browser may take up to several minutes.
const TASK_DURATION_BUCKETS: &[f64] = &[
    0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0, 60.0, 120.0, 300.0, 600.0,
];

/// Number of tasks admitted past the concurrency gate
pub(crate) const TASKS_ACTIVE: &str = "tasks_active";

/// Number of tasks that finished successfully
pub(crate) const TASKS_COMPLETED_TOTAL: &str = "tasks_completed_total";

/// Number of tasks that failed, were cancelled or exhausted their retries
pub(crate) const TASKS_FAILED_TOTAL: &str = "tasks_failed_total";

/// Time spent by a task past the concurrency gate
pub(crate) const TASK_DURATION_SECONDS: &str = "task_duration_seconds";

/// Number of proxies handed out by the rotator
pub(crate) const PROXIES_ISSUED_TOTAL: &str = "proxies_issued_total";

/// Number of browser processes launched
pub(crate) const BROWSER_LAUNCHES_TOTAL: &str = "browser_launches_total";

/// Number of publications sent to the channel, labeled by content type
pub(crate) const PUBLICATIONS_TOTAL: &str = "publications_total";

#[derive(Deserialize)]
struct MetricsConfig {
    metrics_port: Option<u16>,
}

/// Installs the prometheus exporter if `METRICS_PORT` is set.
/// Otherwise the metrics are silently discarded.
pub fn init_metrics() {
    let MetricsConfig { metrics_port } = from_env_or_panic("");

    let Some(port) = metrics_port else {
        info!("METRICS_PORT is not set, metrics exporter is disabled");
        return;
    };

    let mut builder = PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .set_buckets_for_metric(
            Matcher::Full(TASK_DURATION_SECONDS.to_owned()),
            TASK_DURATION_BUCKETS,
        )
        .unwrap_or_else(|err| panic!("BUG: invalid histogram buckets: {err:#?}"));

    for (key, value) in GLOBAL_LABELS {
        builder = builder.add_global_label(*key, *value);
    }

    builder
        .install()
        .unwrap_or_else(|err| panic!("BUG: failed to initialize the metrics listener: {err:#?}"));

    describe();
}

fn describe() {
    metrics::describe_gauge!(
        TASKS_ACTIVE,
        "Number of tasks admitted past the concurrency gate"
    );
    metrics::describe_counter!(
        TASKS_COMPLETED_TOTAL,
        "Number of successfully finished tasks"
    );
    metrics::describe_counter!(TASKS_FAILED_TOTAL, "Number of failed tasks");
    metrics::describe_histogram!(
        TASK_DURATION_SECONDS,
        metrics::Unit::Seconds,
        "Time spent by a task past the concurrency gate"
    );
    metrics::describe_counter!(PROXIES_ISSUED_TOTAL, "Number of proxies handed out");
    metrics::describe_counter!(
        BROWSER_LAUNCHES_TOTAL,
        "Number of browser processes launched"
    );
    metrics::describe_counter!(
        PUBLICATIONS_TOTAL,
        "Number of publications sent to the channel"
    );
}

pub(crate) fn record_task_finished(success: bool, duration: Duration) {
    let name = if success {
        TASKS_COMPLETED_TOTAL
    } else {
        TASKS_FAILED_TOTAL
    };
    metrics::increment_counter!(name);
    metrics::histogram!(TASK_DURATION_SECONDS, duration.as_secs_f64());
}

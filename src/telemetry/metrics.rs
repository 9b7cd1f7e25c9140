//! Metric instruments.
//!
//! Created from the `"redisq"` meter on the globally registered provider.
//! With no provider registered these are no-ops.

use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Gauge, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("redisq")
}

/// Counter: transport operations.
/// Labels: `queue`, `operation` ("send" | "get" | "ack" | "reject"), `result`.
pub fn queue_operations() -> Counter<u64> {
    meter()
        .u64_counter("redisq.queue.operations")
        .with_description("Number of queue operations")
        .build()
}

/// Gauge: live workers under the autoscaler.
pub fn worker_pool_size() -> Gauge<u64> {
    meter()
        .u64_gauge("redisq.autoscale.workers")
        .with_description("Live workers supervised by the autoscaler")
        .build()
}

/// Gauge: last sampled ready-list depth.
pub fn backlog_depth() -> Gauge<u64> {
    meter()
        .u64_gauge("redisq.autoscale.backlog_depth")
        .with_description("Ready-list depth at the last autoscaler sample")
        .build()
}

/// Counter: scale actions. Labels: `direction` ("up" | "down").
pub fn scale_events() -> Counter<u64> {
    meter()
        .u64_counter("redisq.autoscale.events")
        .with_description("Number of autoscaler scale actions")
        .build()
}

/// Count one queue operation.
pub fn record_queue_operation(queue: &str, operation: &'static str, result: &'static str) {
    queue_operations().add(
        1,
        &[
            KeyValue::new("queue", queue.to_string()),
            KeyValue::new("operation", operation),
            KeyValue::new("result", result),
        ],
    );
}

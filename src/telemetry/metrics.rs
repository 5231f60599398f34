//! Metric instrument factories.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! Without one, instruments are no-ops.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("action-invoker")
}

/// Counter: invocation attempts.
/// Labels: `outcome` ("ok" | "failed" | "rejected"), `identity` ("anonymous" | "user").
pub fn invocations() -> Counter<u64> {
    meter()
        .u64_counter("invoker.invocations")
        .with_description("Number of action invocations")
        .build()
}

/// Counter: lifecycle events published.
/// Labels: `phase`.
pub fn lifecycle_events() -> Counter<u64> {
    meter()
        .u64_counter("invoker.lifecycle.events")
        .with_description("Number of work item lifecycle events published")
        .build()
}

/// Histogram: time spent executing the action, in milliseconds.
/// Labels: `outcome`.
pub fn invocation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("invoker.invocation.duration_ms")
        .with_description("Action execution duration in milliseconds")
        .with_unit("ms")
        .build()
}

//! Metric instrument factories for jobgate.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! Without a provider the instruments are no-ops.

use opentelemetry::metrics::{Counter, Meter};

/// Returns the shared meter for jobgate instruments.
fn meter() -> Meter {
    opentelemetry::global::meter(super::SCOPE)
}

/// Counter: work items added to the queue.
pub fn work_added() -> Counter<u64> {
    meter()
        .u64_counter("jobgate.work.added")
        .with_description("Number of work items added to the queue")
        .build()
}

/// Counter: work items handed to a worker before their deadline.
pub fn work_dispatched() -> Counter<u64> {
    meter()
        .u64_counter("jobgate.work.dispatched")
        .with_description("Number of work items dispatched to workers")
        .build()
}

/// Counter: work items completed before their deadline.
pub fn work_completed() -> Counter<u64> {
    meter()
        .u64_counter("jobgate.work.completed")
        .with_description("Number of work items completed")
        .build()
}

/// Counter: work items that missed their deadline.
/// Labels: `stage` ("get" | "in_flight" | "submit").
pub fn work_timeouts() -> Counter<u64> {
    meter()
        .u64_counter("jobgate.work.timeouts")
        .with_description("Number of work items that timed out")
        .build()
}

/// Counter: worker registrations.
pub fn worker_registered() -> Counter<u64> {
    meter()
        .u64_counter("jobgate.worker.registered")
        .with_description("Number of workers registered")
        .build()
}

/// Counter: rejected verifications and session checks.
/// Labels: `operation` ("verify" | "get").
pub fn worker_auth_failures() -> Counter<u64> {
    meter()
        .u64_counter("jobgate.worker.auth_failures")
        .with_description("Number of failed worker verifications and session checks")
        .build()
}

//! Work span helpers.
//!
//! Provides span creation and state-transition recording for work items
//! flowing through the server.

use tracing::Span;

use crate::model::{WorkId, WorkStatus};

/// Start a span for one operation on a work item.
///
/// The `work.status` field is declared empty and is filled by
/// [`record_state_transition`].
pub fn start_work_span(operation: &str, work_id: &WorkId) -> Span {
    tracing::info_span!(
        "work",
        "work.operation" = operation,
        "work.id" = %work_id,
        "work.status" = tracing::field::Empty,
    )
}

/// Record a status transition on the given span.
///
/// Emits a tracing `info` event scoped to the span.
pub fn record_state_transition(span: &Span, from: WorkStatus, to: WorkStatus) {
    span.record("work.status", tracing::field::display(to));
    span.in_scope(|| {
        tracing::info!(from = %from, to = %to, "state_transition");
    });
}

/// Span covering one worker's session, from handshake to its last job.
pub fn start_worker_span(worker_id: &str) -> Span {
    tracing::info_span!("worker", "worker.id" = worker_id)
}

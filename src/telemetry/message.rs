//! Span helpers for message handling.

use tracing::Span;

/// Start a span covering one received message, from handler call to ack/reject.
///
/// `message.outcome` is filled in by [`record_outcome`].
pub fn start_message_span(queue: &str, unique_id: Option<&str>) -> Span {
    tracing::info_span!(
        "message.handle",
        "messaging.destination" = queue,
        "message.unique_id" = unique_id.unwrap_or(""),
        "message.outcome" = tracing::field::Empty,
    )
}

/// Record how a message left the processing list.
pub fn record_outcome(span: &Span, outcome: &str) {
    span.record("message.outcome", outcome);
    span.in_scope(|| {
        tracing::debug!(outcome, "message settled");
    });
}

//! Invocation span helpers.

use tracing::Span;

use crate::model::WorkItemUid;

/// Start a span covering one invocation.
///
/// `identity` and `outcome` are declared empty; fill them with
/// [`record_identity`] and [`record_outcome`] as the invocation proceeds.
pub fn start_invocation_span(action: &str, work_item_uid: Option<&WorkItemUid>) -> Span {
    tracing::info_span!(
        "action.invoke",
        "action.name" = action,
        "work_item.uid" = work_item_uid.map(|u| u.0.as_str()).unwrap_or("-"),
        "action.identity" = tracing::field::Empty,
        "action.outcome" = tracing::field::Empty,
    )
}

pub fn record_identity(span: &Span, mode: &str) {
    span.record("action.identity", mode);
}

pub fn record_outcome(span: &Span, outcome: &str) {
    span.record("action.outcome", outcome);
}

//! Reserved parameter keys and parameter sanitization.
//!
//! Scheduled jobs carry invocation plumbing in their parameter map next to
//! the parameters meant for the action. Everything here operates on a
//! single owned map threaded through one invocation, so mutation in place
//! is fine. All removals are idempotent.

use serde_json::Value;
use uuid::Uuid;

use crate::model::{Params, WorkItemUid};

pub const ACTION_CLASS: &str = "ActionAdapterQuartzJob-ActionClass";
pub const ACTION_ID: &str = "ActionAdapterQuartzJob-ActionId";
pub const ACTION_USER: &str = "ActionAdapterQuartzJob-ActionUser";
pub const STREAM_PROVIDER: &str = "ActionAdapterQuartzJob-StreamProvider";
pub const STREAM_PROVIDER_INPUT_FILE: &str = "ActionAdapterQuartzJob-StreamProvider-InputFile";
pub const STREAM_PROVIDER_OUTPUT_FILE_PATTERN: &str =
    "ActionAdapterQuartzJob-StreamProvider-OutputFilePattern";
pub const STREAM_PROVIDER_UNIQUE_FILE_NAME: &str =
    "ActionAdapterQuartzJob-StreamProvider-UniqueFileName";
pub const UI_PASS_PARAM: &str = "uiPassParam";
pub const USER_LOCALE: &str = "_USER_LOCALE";
pub const WORK_ITEM_UID: &str = "workItemUid";

/// Acting-user name of sessions started by the platform itself.
/// Jobs owned by it run anonymously.
pub const SYSTEM_SESSION_USER: &str = "system session";

/// Markers stripped before the action runs, in removal order.
/// The stream provider marker must be resolved before it is removed.
pub const CONTROL_MARKERS: [&str; 5] = [
    ACTION_CLASS,
    ACTION_ID,
    ACTION_USER,
    STREAM_PROVIDER,
    UI_PASS_PARAM,
];

/// A value that does not count as present: missing, null, or a blank string.
pub(crate) fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(_) => false,
    }
}

/// String form of a marker value. Non-string scalars are rendered as JSON.
pub(crate) fn marker_str(params: &Params, key: &str) -> Option<String> {
    let value = params.get(key);
    if is_blank(value) {
        return None;
    }
    match value? {
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Derive the work item uid from the parameters.
///
/// An explicit `workItemUid` wins. Otherwise the uid is a name-based UUID
/// over the action class and id markers, so repeated runs of the same job
/// share one lifecycle stream.
pub fn extract_uid(params: &Params) -> Option<WorkItemUid> {
    if let Some(uid) = marker_str(params, WORK_ITEM_UID) {
        return Some(WorkItemUid(uid));
    }
    let class = marker_str(params, ACTION_CLASS)?;
    let id = marker_str(params, ACTION_ID)?;
    let name = format!("{class}\0{id}");
    Some(WorkItemUid(
        Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string(),
    ))
}

/// Put `default_locale` into the map unless the caller supplied one.
/// Returns whether the map was changed.
pub fn ensure_locale(params: &mut Params, default_locale: &str) -> bool {
    if !is_blank(params.get(USER_LOCALE)) {
        return false;
    }
    params.insert(
        USER_LOCALE.to_string(),
        Value::String(default_locale.to_string()),
    );
    true
}

/// Remove every control marker. Absent keys are skipped.
pub fn strip_control_markers(params: &mut Params) {
    for key in CONTROL_MARKERS {
        params.remove(key);
    }
}

/// Resolve the locale, then strip the control markers.
pub fn sanitize(params: &mut Params, default_locale: &str) {
    ensure_locale(params, default_locale);
    strip_control_markers(params);
}

//! Integration tests for the action invoker.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use action_invoker::config::InvokerConfig;
use action_invoker::error::{InvocationError, NULL_ACTION_MESSAGE};
use action_invoker::identity::{
    Identity, IdentityScopedRunner, ScopedRunner, current_security_context,
};
use action_invoker::lifecycle::{
    LifecycleEvent, LifecyclePhase, LifecycleSink, WorkItemLifecyclePublisher,
};
use action_invoker::model::ActionFailure;
use action_invoker::params::*;
use action_invoker::stream::StreamProviderHandle;
use action_invoker::{Action, ActionContext, ActionDetails, ActionInvoker, ActionOutcome, Params};
use serde_json::{Value, json};

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<LifecycleEvent>>,
}

impl RecordingSink {
    fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().unwrap().clone()
    }

    fn phases(&self) -> Vec<LifecyclePhase> {
        self.events().iter().map(|e| e.phase).collect()
    }
}

impl LifecycleSink for RecordingSink {
    fn emit(&self, event: &LifecycleEvent) -> anyhow::Result<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

struct Call {
    identity: Identity,
    params: Params,
    stream_provider: Option<StreamProviderHandle>,
}

/// Records each call, then runs the action through the real scoped runner.
#[derive(Default)]
struct RecordingRunner {
    calls: Mutex<Vec<Call>>,
    inner: ScopedRunner,
}

impl RecordingRunner {
    fn identities(&self) -> Vec<Identity> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.identity.clone())
            .collect()
    }
}

impl IdentityScopedRunner for RecordingRunner {
    fn run(
        &self,
        identity: &Identity,
        action: &dyn Action,
        params: &Params,
        stream_provider: Option<&StreamProviderHandle>,
    ) -> anyhow::Result<ActionOutcome> {
        self.calls.lock().unwrap().push(Call {
            identity: identity.clone(),
            params: params.clone(),
            stream_provider: stream_provider.cloned(),
        });
        self.inner.run(identity, action, params, stream_provider)
    }
}

struct FnAction<F>(F);

impl<F> Action for FnAction<F>
where
    F: Fn(ActionContext<'_>) -> anyhow::Result<ActionOutcome> + Send + Sync,
{
    fn execute(&self, ctx: ActionContext<'_>) -> anyhow::Result<ActionOutcome> {
        (self.0)(ctx)
    }
}

fn action<F>(f: F) -> Arc<dyn Action>
where
    F: Fn(ActionContext<'_>) -> anyhow::Result<ActionOutcome> + Send + Sync + 'static,
{
    Arc::new(FnAction(f))
}

fn noop() -> Arc<dyn Action> {
    action(|_| Ok(ActionOutcome::unchanged()))
}

struct Harness {
    invoker: ActionInvoker,
    sink: Arc<RecordingSink>,
    runner: Arc<RecordingRunner>,
}

fn harness() -> Harness {
    let sink = Arc::new(RecordingSink::default());
    let runner = Arc::new(RecordingRunner::default());
    let publisher = WorkItemLifecyclePublisher::new().with_sink(sink.clone());
    let invoker = ActionInvoker::new(
        InvokerConfig {
            default_locale: "fr_FR".to_string(),
        },
        publisher,
    )
    .with_runner(runner.clone());
    Harness {
        invoker,
        sink,
        runner,
    }
}

fn params(value: Value) -> Params {
    value.as_object().cloned().expect("params must be an object")
}

fn job_params() -> Params {
    params(json!({
        ACTION_CLASS: "X",
        ACTION_ID: "1",
        ACTION_USER: "",
    }))
}

// ---------------------------------------------------------------------------
// Happy path
// ---------------------------------------------------------------------------

#[test]
fn valid_job_runs_anonymously_and_publishes_in_progress_once() {
    let h = harness();

    let status = h
        .invoker
        .invoke(ActionDetails::new(noop(), job_params()))
        .unwrap();

    assert!(status.failure.is_none());
    assert!(!status.requires_update);
    assert_eq!(h.runner.identities(), vec![Identity::Anonymous]);
    assert_eq!(h.sink.phases(), vec![LifecyclePhase::InProgress]);
}

#[test]
fn in_progress_is_published_before_the_action_runs() {
    let h = harness();
    let sink = h.sink.clone();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_in_action = seen.clone();

    h.invoker
        .invoke(ActionDetails::new(
            action(move |_| {
                *seen_in_action.lock().unwrap() = sink.phases();
                Ok(ActionOutcome::unchanged())
            }),
            job_params(),
        ))
        .unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![LifecyclePhase::InProgress]);
}

#[test]
fn requires_update_and_details_are_reported() {
    let h = harness();

    let status = h
        .invoker
        .invoke(ActionDetails::new(
            action(|_| Ok(ActionOutcome::requires_update().with_details(json!({"rows": 12})))),
            job_params(),
        ))
        .unwrap();

    assert!(status.is_success());
    assert!(status.requires_update);
    assert_eq!(status.details, Some(json!({"rows": 12})));
}

// ---------------------------------------------------------------------------
// Preconditions
// ---------------------------------------------------------------------------

fn assert_rejected(h: &Harness, result: Result<action_invoker::InvokeStatus, InvocationError>) {
    assert!(matches!(result, Err(InvocationError::NullAction)));
    let events = h.sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].phase, LifecyclePhase::Failed);
    assert_eq!(events[0].message.as_deref(), Some(NULL_ACTION_MESSAGE));
    assert!(h.runner.identities().is_empty(), "action must not run");
}

#[test]
fn missing_action_is_rejected() {
    let h = harness();
    let details = ActionDetails {
        action: None,
        parameters: Some(job_params()),
        user_name: None,
    };

    let result = h.invoker.invoke(details);

    assert_rejected(&h, result);
    // The uid is still derived from the parameters that were supplied.
    assert!(h.sink.events()[0].work_item_uid.is_some());
}

#[test]
fn missing_parameters_are_rejected() {
    let h = harness();
    let details = ActionDetails {
        action: Some(noop()),
        parameters: None,
        user_name: Some("alice".to_string()),
    };

    let result = h.invoker.invoke(details);

    assert_rejected(&h, result);
    assert!(h.sink.events()[0].work_item_uid.is_none());
}

#[test]
fn missing_details_are_rejected() {
    let h = harness();

    let result = h.invoker.invoke(None);

    assert_rejected(&h, result);
    let event = &h.sink.events()[0];
    assert!(event.work_item_uid.is_none());
    assert!(event.params.is_none());
}

#[test]
fn missing_action_id_marker_is_rejected() {
    let h = harness();
    let mut p = job_params();
    p.remove(ACTION_ID);

    let result = h.invoker.invoke(ActionDetails::new(noop(), p));

    assert!(matches!(
        result,
        Err(InvocationError::MissingMarker(ACTION_ID))
    ));
    assert_eq!(h.sink.phases(), vec![LifecyclePhase::Failed]);
    assert!(h.runner.identities().is_empty());
}

// ---------------------------------------------------------------------------
// Failure capture
// ---------------------------------------------------------------------------

#[test]
fn action_error_is_captured_not_raised() {
    let h = harness();

    let status = h
        .invoker
        .invoke(ActionDetails::new(
            action(|_| Err(anyhow::anyhow!("disk full"))),
            job_params(),
        ))
        .unwrap();

    assert!(matches!(status.failure, Some(ActionFailure::Error(_))));
    assert!(!status.requires_update);
    assert_eq!(
        h.sink.phases(),
        vec![LifecyclePhase::InProgress, LifecyclePhase::Failed]
    );
    let failed = &h.sink.events()[1];
    assert_eq!(failed.message.as_deref(), Some("disk full"));
}

#[test]
fn error_context_chain_is_kept_in_the_failure_message() {
    let h = harness();

    let status = h
        .invoker
        .invoke(ActionDetails::new(
            action(|_| {
                Err(anyhow::anyhow!("connection refused").context("loading report data"))
            }),
            job_params(),
        ))
        .unwrap();

    let message = status.failure.unwrap().to_string();
    assert_eq!(message, "loading report data: connection refused");
}

#[test]
fn panic_is_captured_not_raised() {
    let h = harness();

    let status = h
        .invoker
        .invoke(ActionDetails::new(
            action(|_| panic!("index out of range")),
            job_params(),
        ))
        .unwrap();

    match status.failure {
        Some(ActionFailure::Panic(ref msg)) => assert_eq!(msg, "index out of range"),
        ref other => panic!("expected a captured panic, got {other:?}"),
    }
    assert!(!status.requires_update);

    let events = h.sink.events();
    assert_eq!(events.iter().filter(|e| e.phase.is_terminal()).count(), 1);
    assert!(
        events[1]
            .message
            .as_deref()
            .unwrap()
            .contains("index out of range")
    );
    assert!(current_security_context().is_none(), "identity leaked");
}

// ---------------------------------------------------------------------------
// Identity selection
// ---------------------------------------------------------------------------

fn run_as(user: Option<&str>) -> Identity {
    let h = harness();
    let mut details = ActionDetails::new(noop(), job_params());
    details.user_name = user.map(str::to_string);
    h.invoker.invoke(details).unwrap();
    h.runner.identities().pop().unwrap()
}

#[test]
fn identity_follows_the_acting_user() {
    assert_eq!(run_as(None), Identity::Anonymous);
    assert_eq!(run_as(Some("")), Identity::Anonymous);
    assert_eq!(run_as(Some(SYSTEM_SESSION_USER)), Identity::Anonymous);
    assert_eq!(run_as(Some("alice")), Identity::User("alice".to_string()));
}

#[test]
fn action_sees_the_named_user_as_current_identity() {
    let h = harness();

    let status = h
        .invoker
        .invoke(
            ActionDetails::new(
                action(|ctx| {
                    let current = current_security_context().expect("no current identity");
                    anyhow::ensure!(current.principal == "alice", "ran as {}", current.principal);
                    anyhow::ensure!(!ctx.security.anonymous);
                    Ok(ActionOutcome::unchanged())
                }),
                job_params(),
            )
            .user("alice"),
        )
        .unwrap();

    assert!(status.is_success(), "{:?}", status.failure);
}

#[test]
fn concurrent_invocations_do_not_share_identity() {
    let invoker = ActionInvoker::new(
        InvokerConfig::default(),
        WorkItemLifecyclePublisher::new(),
    );
    let mismatches = Arc::new(AtomicUsize::new(0));

    std::thread::scope(|s| {
        for i in 0..8 {
            let invoker = invoker.clone();
            let mismatches = mismatches.clone();
            s.spawn(move || {
                let user = format!("user-{i}");
                let expected = user.clone();
                for _ in 0..50 {
                    let expected = expected.clone();
                    let mismatches = mismatches.clone();
                    let status = invoker
                        .invoke(
                            ActionDetails::new(
                                action(move |_| {
                                    std::thread::yield_now();
                                    let current = current_security_context();
                                    if current.map(|c| c.principal.clone()) != Some(expected.clone())
                                    {
                                        mismatches.fetch_add(1, Ordering::SeqCst);
                                    }
                                    Ok(ActionOutcome::unchanged())
                                }),
                                job_params(),
                            )
                            .user(user.clone()),
                        )
                        .unwrap();
                    assert!(status.is_success());
                }
                assert!(current_security_context().is_none());
            });
        }
    });

    assert_eq!(mismatches.load(Ordering::SeqCst), 0);
}

// ---------------------------------------------------------------------------
// Parameter handling
// ---------------------------------------------------------------------------

#[test]
fn action_never_sees_invocation_plumbing() {
    let h = harness();
    let mut p = job_params();
    p.insert(UI_PASS_PARAM.to_string(), json!("PDF"));
    p.insert(
        STREAM_PROVIDER.to_string(),
        json!({"inputFilePath": "/public/a.prpt", "outputFilePattern": "/home/a.*"}),
    );
    p.insert("region".to_string(), json!("emea"));

    h.invoker.invoke(ActionDetails::new(noop(), p)).unwrap();

    let calls = h.runner.calls.lock().unwrap();
    let seen = &calls[0].params;
    for key in CONTROL_MARKERS {
        assert!(!seen.contains_key(key), "{key} leaked to the action");
    }
    assert_eq!(seen.get(USER_LOCALE), Some(&json!("fr_FR")));
    assert_eq!(seen.get("region"), Some(&json!("emea")));
}

#[test]
fn explicit_locale_is_not_overwritten() {
    let h = harness();
    let mut p = job_params();
    p.insert(USER_LOCALE.to_string(), json!("ja_JP"));

    h.invoker.invoke(ActionDetails::new(noop(), p)).unwrap();

    let calls = h.runner.calls.lock().unwrap();
    assert_eq!(calls[0].params.get(USER_LOCALE), Some(&json!("ja_JP")));
}

#[test]
fn stream_provider_is_resolved_before_it_is_stripped() {
    let h = harness();
    let mut p = job_params();
    p.insert(
        STREAM_PROVIDER.to_string(),
        json!({
            "inputFilePath": "/public/sales.prpt",
            "outputFilePattern": "/home/admin/sales.*",
            "autoCreateUniqueFilename": false
        }),
    );

    h.invoker.invoke(ActionDetails::new(noop(), p)).unwrap();

    let calls = h.runner.calls.lock().unwrap();
    assert_eq!(
        calls[0].stream_provider,
        Some(StreamProviderHandle {
            input_file_path: "/public/sales.prpt".to_string(),
            output_file_pattern: "/home/admin/sales.*".to_string(),
            auto_create_unique_filename: false,
        })
    );
}

#[test]
fn failed_event_carries_the_sanitized_parameters() {
    let h = harness();

    h.invoker
        .invoke(ActionDetails::new(
            action(|_| anyhow::bail!("boom")),
            job_params(),
        ))
        .unwrap();

    let events = h.sink.events();
    let in_progress = events[0].params.as_ref().unwrap();
    let failed = events[1].params.as_ref().unwrap();
    assert!(in_progress.contains_key(ACTION_CLASS));
    assert!(!failed.contains_key(ACTION_CLASS));
}

// ---------------------------------------------------------------------------
// Work item uid
// ---------------------------------------------------------------------------

#[test]
fn same_markers_share_one_lifecycle_stream() {
    let h = harness();

    h.invoker
        .invoke(ActionDetails::new(noop(), job_params()))
        .unwrap();
    h.invoker
        .invoke(ActionDetails::new(noop(), job_params()))
        .unwrap();
    let mut other = job_params();
    other.insert(ACTION_ID.to_string(), json!("2"));
    h.invoker.invoke(ActionDetails::new(noop(), other)).unwrap();

    let uids: Vec<_> = h
        .sink
        .events()
        .into_iter()
        .map(|e| e.work_item_uid.unwrap())
        .collect();
    assert_eq!(uids[0], uids[1]);
    assert_ne!(uids[0], uids[2]);
}

#[test]
fn explicit_work_item_uid_is_used() {
    let h = harness();
    let mut p = job_params();
    p.insert(WORK_ITEM_UID.to_string(), json!("WI-42"));

    h.invoker.invoke(ActionDetails::new(noop(), p)).unwrap();

    assert_eq!(h.sink.events()[0].work_item_uid.as_ref().unwrap().0, "WI-42");
}

// ---------------------------------------------------------------------------
// Publishing is best effort
// ---------------------------------------------------------------------------

struct BrokenSink;

impl LifecycleSink for BrokenSink {
    fn emit(&self, _event: &LifecycleEvent) -> anyhow::Result<()> {
        anyhow::bail!("monitoring endpoint unreachable")
    }
}

#[test]
fn broken_sink_does_not_affect_the_invocation() {
    let sink = Arc::new(RecordingSink::default());
    let publisher = WorkItemLifecyclePublisher::new()
        .with_sink(Arc::new(BrokenSink))
        .with_sink(sink.clone());
    let invoker = ActionInvoker::new(InvokerConfig::default(), publisher);

    let status = invoker
        .invoke(ActionDetails::new(
            action(|_| Ok(ActionOutcome::requires_update())),
            job_params(),
        ))
        .unwrap();

    assert!(status.is_success());
    assert!(status.requires_update);
    assert_eq!(sink.phases(), vec![LifecyclePhase::InProgress]);
}

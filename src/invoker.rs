//! Local action invoker. The single entry point for running a job.
//!
//! One call to [`ActionInvoker::invoke`] validates the request, announces
//! the work item as in progress, strips invocation plumbing from the
//! parameters, picks the identity to run as, and runs the action under it.
//! Precondition failures are returned as [`InvocationError`]; anything the
//! action does wrong, panics included, is captured in the returned
//! [`InvokeStatus`]. This is the only place failures are recovered.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Instant;

use opentelemetry::KeyValue;
use tracing::{debug, error, warn};

use crate::config::InvokerConfig;
use crate::error::InvocationError;
use crate::identity::{Identity, IdentityScopedRunner, ScopedRunner};
use crate::lifecycle::{LifecyclePhase, WorkItemLifecyclePublisher};
use crate::model::{ActionDetails, ActionFailure, InvokeStatus, Params, WorkItemUid};
use crate::params::{self, ACTION_CLASS, ACTION_ID};
use crate::stream;
use crate::telemetry::invocation::{record_identity, record_outcome, start_invocation_span};
use crate::telemetry::metrics;

/// Runs actions in this process. Cheap to share; holds no per-invocation state.
#[derive(Clone)]
pub struct ActionInvoker {
    runner: Arc<dyn IdentityScopedRunner>,
    publisher: WorkItemLifecyclePublisher,
    config: InvokerConfig,
}

impl ActionInvoker {
    /// Invoker using the default [`ScopedRunner`].
    pub fn new(config: InvokerConfig, publisher: WorkItemLifecyclePublisher) -> Self {
        Self {
            runner: Arc::new(ScopedRunner::new()),
            publisher,
            config,
        }
    }

    pub fn with_runner(mut self, runner: Arc<dyn IdentityScopedRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn publisher(&self) -> &WorkItemLifecyclePublisher {
        &self.publisher
    }

    /// Invoke an action locally as the user who scheduled it.
    ///
    /// Accepts `ActionDetails` or `Option<ActionDetails>`; `None` is
    /// rejected like any other incomplete request.
    ///
    /// # Errors
    ///
    /// [`InvocationError`] when the action, its parameters, or the
    /// markers identifying the work item are missing. A FAILED lifecycle
    /// event is published first and the action is never run.
    pub fn invoke(
        &self,
        details: impl Into<Option<ActionDetails>>,
    ) -> Result<InvokeStatus, InvocationError> {
        let details = details.into();
        let uid = details.as_ref().and_then(ActionDetails::work_item_uid);

        let (action, mut params, user_name) = match details {
            Some(ActionDetails {
                action: Some(action),
                parameters: Some(params),
                user_name,
            }) => (action, params, user_name),
            other => {
                let params = other.as_ref().and_then(|d| d.parameters.as_ref());
                return Err(self.reject(uid.as_ref(), params, InvocationError::NullAction));
            }
        };

        for key in [ACTION_CLASS, ACTION_ID] {
            if params::is_blank(params.get(key)) {
                return Err(self.reject(
                    uid.as_ref(),
                    Some(&params),
                    InvocationError::MissingMarker(key),
                ));
            }
        }

        let span = start_invocation_span(action.name(), uid.as_ref());
        let _enter = span.enter();

        self.publisher
            .publish(uid.as_ref(), Some(&params), LifecyclePhase::InProgress, None);
        debug!(action = action.name(), params = ?params, "running action locally");

        let stream_provider = stream::resolve(&params);
        params::sanitize(&mut params, &self.config.default_locale);

        let identity = Identity::for_acting_user(user_name.as_deref());
        record_identity(&span, identity.mode());

        let started = Instant::now();
        let result = catch_unwind(AssertUnwindSafe(|| {
            self.runner.run(
                &identity,
                action.as_ref(),
                &params,
                stream_provider.as_ref(),
            )
        }));
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        let mut status = InvokeStatus::default();
        match result {
            Ok(Ok(outcome)) => {
                status.requires_update = outcome.requires_update;
                status.details = outcome.details;
            }
            Ok(Err(e)) => status.failure = Some(ActionFailure::Error(e)),
            Err(payload) => status.failure = Some(ActionFailure::Panic(panic_message(&*payload))),
        }

        if let Some(ref failure) = status.failure {
            let description = failure.to_string();
            error!(action = action.name(), identity = %identity, error = %description, "action failed");
            self.publisher.publish(
                uid.as_ref(),
                Some(&params),
                LifecyclePhase::Failed,
                Some(&description),
            );
        }

        let outcome = if status.is_success() { "ok" } else { "failed" };
        record_outcome(&span, outcome);
        metrics::invocations().add(
            1,
            &[
                KeyValue::new("outcome", outcome),
                KeyValue::new("identity", identity.mode()),
            ],
        );
        metrics::invocation_duration_ms().record(elapsed_ms, &[KeyValue::new("outcome", outcome)]);

        Ok(status)
    }

    fn reject(
        &self,
        uid: Option<&WorkItemUid>,
        params: Option<&Params>,
        err: InvocationError,
    ) -> InvocationError {
        let message = err.to_string();
        warn!(work_item_uid = ?uid, error = %message, "rejecting invocation");
        self.publisher
            .publish(uid, params, LifecyclePhase::Failed, Some(&message));
        metrics::invocations().add(1, &[KeyValue::new("outcome", "rejected")]);
        err
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

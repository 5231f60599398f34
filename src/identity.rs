//! Identity selection and identity-scoped execution.
//!
//! A job runs as the user who scheduled it, or anonymously when there is
//! no such user. The identity is passed to the action explicitly and is
//! also installed as the calling thread's current [`SecurityContext`] for
//! exactly the duration of the call. Scopes are thread-local, nest, and
//! restore the previous context on drop, including while unwinding.

use std::cell::RefCell;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::model::{Action, ActionContext, ActionOutcome, Params};
use crate::params::SYSTEM_SESSION_USER;
use crate::stream::StreamProviderHandle;

pub const ANONYMOUS_PRINCIPAL: &str = "anonymousUser";
pub const ANONYMOUS_ROLE: &str = "Anonymous";
pub const AUTHENTICATED_ROLE: &str = "Authenticated";

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Who an action runs as.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "mode", content = "user", rename_all = "snake_case")]
pub enum Identity {
    Anonymous,
    User(String),
}

impl Identity {
    /// Pick the run identity for a job's acting user.
    ///
    /// Jobs created by the platform's own session are not run as an
    /// authenticated user; they run anonymously like unowned jobs.
    pub fn for_acting_user(user: Option<&str>) -> Self {
        match user {
            None => Identity::Anonymous,
            Some(u) if u.is_empty() || u == SYSTEM_SESSION_USER => Identity::Anonymous,
            Some(u) => Identity::User(u.to_string()),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Identity::Anonymous)
    }

    /// Short label for logs and metrics.
    pub fn mode(&self) -> &'static str {
        match self {
            Identity::Anonymous => "anonymous",
            Identity::User(_) => "user",
        }
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Identity::Anonymous => f.write_str(ANONYMOUS_PRINCIPAL),
            Identity::User(name) => f.write_str(name),
        }
    }
}

// ---------------------------------------------------------------------------
// Security context
// ---------------------------------------------------------------------------

/// An opened session for one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityContext {
    pub session_id: Uuid,
    pub principal: String,
    pub roles: Vec<String>,
    pub anonymous: bool,
}

impl SecurityContext {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// Opens security contexts. Backed by the platform's session machinery.
pub trait SessionProvider: Send + Sync {
    fn open(&self, identity: &Identity) -> anyhow::Result<SecurityContext>;
}

/// Session provider that grants fixed roles without consulting a user store.
#[derive(Debug, Clone, Default)]
pub struct DefaultSessionProvider;

impl SessionProvider for DefaultSessionProvider {
    fn open(&self, identity: &Identity) -> anyhow::Result<SecurityContext> {
        let ctx = match identity {
            Identity::Anonymous => SecurityContext {
                session_id: Uuid::new_v4(),
                principal: ANONYMOUS_PRINCIPAL.to_string(),
                roles: vec![ANONYMOUS_ROLE.to_string()],
                anonymous: true,
            },
            Identity::User(name) => SecurityContext {
                session_id: Uuid::new_v4(),
                principal: name.clone(),
                roles: vec![AUTHENTICATED_ROLE.to_string()],
                anonymous: false,
            },
        };
        Ok(ctx)
    }
}

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

thread_local! {
    static CURRENT: RefCell<Option<Arc<SecurityContext>>> = const { RefCell::new(None) };
}

/// The security context of the innermost active scope on this thread.
pub fn current_security_context() -> Option<Arc<SecurityContext>> {
    CURRENT.with(|c| c.borrow().clone())
}

/// Guard that makes a context current on this thread until dropped.
///
/// Not `Send`: the scope must end on the thread that entered it.
pub struct IdentityScope {
    previous: Option<Arc<SecurityContext>>,
    _not_send: std::marker::PhantomData<*const ()>,
}

impl IdentityScope {
    pub fn enter(ctx: Arc<SecurityContext>) -> Self {
        let previous = CURRENT.with(|c| c.replace(Some(ctx)));
        Self {
            previous,
            _not_send: std::marker::PhantomData,
        }
    }
}

impl Drop for IdentityScope {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|c| {
            *c.borrow_mut() = previous;
        });
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Runs an action so that every identity check inside it resolves as the
/// given identity. Failures, panics included, reach the caller untouched.
pub trait IdentityScopedRunner: Send + Sync {
    fn run(
        &self,
        identity: &Identity,
        action: &dyn Action,
        params: &Params,
        stream_provider: Option<&StreamProviderHandle>,
    ) -> anyhow::Result<ActionOutcome>;
}

/// Default runner: open a session, scope it to the call, execute.
pub struct ScopedRunner<P = DefaultSessionProvider> {
    sessions: P,
}

impl ScopedRunner {
    pub fn new() -> Self {
        Self {
            sessions: DefaultSessionProvider,
        }
    }
}

impl Default for ScopedRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: SessionProvider> ScopedRunner<P> {
    pub fn with_sessions(sessions: P) -> Self {
        Self { sessions }
    }
}

impl<P: SessionProvider> IdentityScopedRunner for ScopedRunner<P> {
    fn run(
        &self,
        identity: &Identity,
        action: &dyn Action,
        params: &Params,
        stream_provider: Option<&StreamProviderHandle>,
    ) -> anyhow::Result<ActionOutcome> {
        let ctx = Arc::new(self.sessions.open(identity)?);
        debug!(
            principal = %ctx.principal,
            session_id = %ctx.session_id,
            action = action.name(),
            "entering identity scope"
        );

        let _scope = IdentityScope::enter(Arc::clone(&ctx));
        action.execute(ActionContext {
            security: &ctx,
            params,
            stream_provider,
        })
    }
}

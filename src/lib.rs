//! # action-invoker
//!
//! Runs scheduled actions locally under the identity of the user who
//! scheduled them, and reports each run's lifecycle to whoever is
//! watching.
//!
//! The entry point is [`invoker::ActionInvoker::invoke`].

pub mod config;
pub mod error;
pub mod identity;
pub mod invoker;
pub mod lifecycle;
pub mod model;
pub mod params;
pub mod stream;
pub mod telemetry;

pub use error::InvocationError;
pub use invoker::ActionInvoker;
pub use model::{Action, ActionContext, ActionDetails, ActionOutcome, InvokeStatus, Params};

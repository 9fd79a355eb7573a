//! `nodes` crate: action kinds, their typed parameters, and the
//! `ActionInvoker` contract the engine dispatches side effects through.
//!
//! The concrete integrations (messaging provider, email, webhook client,
//! CRM record mutation) live outside this workspace; they plug in by
//! implementing [`ActionInvoker`] and registering with a [`HandlerRegistry`].

pub mod action;
pub mod error;
pub mod traits;
pub mod registry;
pub mod dry_run;
pub mod mock;

pub use action::{ActionKind, ActionSpec};
pub use error::{ActionError, ParamError};
pub use registry::HandlerRegistry;
pub use traits::{ActionInvoker, EventContext, InvocationContext};

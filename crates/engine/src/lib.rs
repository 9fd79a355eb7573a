//! `engine` crate: graph model, compiler, and the durable execution engine.
//!
//! Authored [`Graph`]s are compiled into immutable [`Plan`]s; instances are
//! bound to one plan version for life and advanced one node at a time by the
//! [`WorkflowExecutor`].

pub mod audit;
pub mod clock;
pub mod compiler;
pub mod config;
pub mod error;
pub mod executor;
pub mod instance;
pub mod models;
pub mod plan;
pub mod postgres;
pub mod predicate;
pub mod store;
pub mod worker;

pub use audit::{AuditEntry, AuditOutcome, AuditRecorder, MemoryAuditRecorder};
pub use compiler::compile;
pub use config::{EngineConfig, WorkerConfig};
pub use error::{CompileError, EngineError};
pub use executor::{RunOutcome, WorkflowExecutor};
pub use instance::{InstanceStatus, WorkflowInstance};
pub use models::{Branch, DelayUnit, Edge, Graph, Node, NodeKind, TriggerKind};
pub use plan::{Plan, PlanVersion};
pub use predicate::Predicate;
pub use store::{InstanceStore, MemoryInstanceStore, MemoryPlanStore, PlanStore};
pub use worker::{Sweeper, Worker};

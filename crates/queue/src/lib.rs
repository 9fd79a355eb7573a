//! `queue` crate: durable wake-up scheduling for workflow instances.
//!
//! A suspended instance (delay node or action retry back-off) never holds a
//! worker. Instead a [`Scheduler`] records *when* it must be handed back to
//! the engine, and workers poll for instances whose time has come.

pub mod error;
pub mod memory;
pub mod scheduler;

pub use error::SchedulerError;
pub use memory::MemoryScheduler;
pub use scheduler::{Scheduler, WakeUp};

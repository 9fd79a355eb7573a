//! Scheduler error type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The backing store rejected or failed the operation.
    #[error("scheduler backend error: {0}")]
    Backend(String),
}

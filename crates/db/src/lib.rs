//! `db` crate: pure persistence layer.
//!
//! Provides a connection pool, typed row structs, and repository functions
//! for every table in the workflow engine schema. No business logic lives
//! here: status transitions are expressed as conditional updates and the
//! engine decides what they mean.

pub mod error;
pub mod pool;
pub mod repository;
pub mod models;

pub use pool::DbPool;
pub use error::DbError;

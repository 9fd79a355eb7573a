//! Repository functions, one function per database operation.
//!
//! Every function takes a `&DbPool` and returns a `Result<T, DbError>`.
//! Pure SQL without domain types.

pub mod plans;
pub mod instances;
pub mod wakeups;
pub mod audit;

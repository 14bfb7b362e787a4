//! Helpers for testing sync pipelines against in-memory collaborators.
//!
//! The `Faulty*` wrappers forward to a real implementation and fail on demand, which is how
//! retry, circuit breaker and crash recovery paths are exercised.

pub mod checkpoint;
pub mod faults;
pub mod source;
pub mod storage;
pub mod table;
pub mod wait;
pub mod warehouse;

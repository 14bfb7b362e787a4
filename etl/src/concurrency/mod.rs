//! Concurrency primitives used to coordinate table pipelines.
//!
//! - [`shutdown`] broadcasts a graceful stop to every pipeline of an orchestrator.
//! - [`lease`] serializes merges into the same destination table.
//! - [`timeout`] bounds every call into an external system.

pub mod lease;
pub mod shutdown;
pub mod signal;
pub mod timeout;

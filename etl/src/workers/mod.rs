//! Per-table sync pipelines and the pool running them.

pub mod policy;
pub mod pool;
pub mod sync;

//! Warehouses that staged batches are merged into.

mod base;
pub mod memory;
pub mod postgres;

pub use base::*;

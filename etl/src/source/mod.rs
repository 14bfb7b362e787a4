//! Change sources feeding the sync pipelines.

mod base;
pub mod memory;
pub mod postgres;

pub use base::*;

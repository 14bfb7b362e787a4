//! Durable object storage holding batch artifacts.

mod backend;
mod base;
pub mod filesystem;
pub mod memory;

pub use base::*;

mod base;
pub mod filesystem;
pub mod memory;
pub mod postgres;

pub use base::*;

//! Staging loads and merges into target tables.

pub mod merge;
pub mod staging;

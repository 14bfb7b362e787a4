//! Accumulation of change events into durable batches.

pub mod buffer;
pub mod writer;

//! Durable per-table checkpoint stores.

pub mod checkpoint;

//! Core data types moved through the replication pipeline.

mod batch;
mod event;
mod table;

pub use batch::*;
pub use event::*;
pub use table::*;

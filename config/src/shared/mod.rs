mod base;
mod batch;
mod checkpoint_store;
mod connection;
mod destination;
mod object_store;
mod pipeline;
mod replicator;
mod retry;
mod source;
mod table;

pub use base::*;
pub use batch::*;
pub use checkpoint_store::*;
pub use connection::*;
pub use destination::*;
pub use object_store::*;
pub use pipeline::*;
pub use replicator::*;
pub use retry::*;
pub use source::*;
pub use table::*;

//! Postgres access shared by the replication core and the replicator binary.
//!
//! Holds the SQL used against Postgres in its three roles: polled source, checkpoint
//! store and warehouse.

pub mod checkpoints;
pub mod db;
pub mod polling;
pub mod schema;
pub mod warehouse;

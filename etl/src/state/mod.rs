//! Per-table progress tracked by a sync pipeline.
//!
//! - [`checkpoint`] holds the durable high watermark and the staging ledger.
//! - [`phase`] models the pipeline's state machine and its published status.
//! - [`retry`] counts consecutive failures and decides between backoff and circuit opening.

pub mod checkpoint;
pub mod phase;
pub mod retry;

//! Named fault injection points at stage boundaries of the sync pipeline.
//!
//! Inactive unless the `failpoints` feature is enabled and a point is configured with
//! `fail::cfg`. The configured parameter selects the error kind: `retry` or `no_retry`.

use fail::fail_point;

use crate::bail;
use crate::error::{ErrorKind, EtlResult};

pub const SYNC_PIPELINE__AFTER_WRITE: &str = "sync_pipeline.after_write";
pub const SYNC_PIPELINE__AFTER_STAGING: &str = "sync_pipeline.after_staging";
pub const SYNC_PIPELINE__AFTER_MERGE: &str = "sync_pipeline.after_merge";

pub fn etl_fail_point(name: &str) -> EtlResult<()> {
    fail_point!(name, |parameter| {
        let mut error_kind = ErrorKind::WithNoRetry;
        if let Some(parameter) = parameter {
            error_kind = match parameter.as_str() {
                "retry" => ErrorKind::WithRetry,
                _ => ErrorKind::WithNoRetry,
            }
        }

        bail!(
            error_kind,
            "An error occurred in a fail point",
            format!("The failpoint '{name}' returned an error")
        );
    });

    Ok(())
}

use std::future::Future;
use std::time::Duration;

use crate::error::{ErrorKind, EtlResult};
use crate::etl_error;

/// Runs `future` with a deadline, failing with [`ErrorKind::OperationTimedOut`] when exceeded.
///
/// `operation` names the call in the error detail.
pub async fn with_timeout<F, T>(duration: Duration, operation: &str, future: F) -> EtlResult<T>
where
    F: Future<Output = EtlResult<T>>,
{
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(elapsed) => Err(etl_error!(
            ErrorKind::OperationTimedOut,
            "Operation timed out",
            format!("{operation} did not complete within {duration:?}"),
            source: elapsed
        )),
    }
}

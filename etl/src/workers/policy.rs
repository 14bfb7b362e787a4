use crate::error::{ErrorKind, EtlError};

/// Retry behavior for a classified error.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RetryDirective {
    /// The stage can be retried with backoff.
    Retry,
    /// The table's pipeline must stop.
    Fatal,
}

/// Policy describing how an [`EtlError`] should be handled by a sync pipeline.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ErrorHandlingPolicy {
    retry_directive: RetryDirective,
    solution: Option<&'static str>,
}

impl ErrorHandlingPolicy {
    const fn new(retry_directive: RetryDirective, solution: Option<&'static str>) -> Self {
        Self {
            retry_directive,
            solution,
        }
    }

    pub fn retry_directive(&self) -> RetryDirective {
        self.retry_directive
    }

    /// Returns an optional operator-facing solution message.
    pub fn solution(&self) -> Option<&'static str> {
        self.solution
    }

    pub fn is_fatal(&self) -> bool {
        self.retry_directive == RetryDirective::Fatal
    }
}

/// Builds an [`ErrorHandlingPolicy`] from an [`EtlError`].
///
/// Aggregated errors are fatal as soon as one of them is.
pub fn build_error_policy(error: &EtlError) -> ErrorHandlingPolicy {
    let kinds = error.kinds();
    if kinds.len() > 1 {
        let fatal = kinds
            .iter()
            .any(|kind| policy_for_kind(*kind).is_fatal());

        return if fatal {
            ErrorHandlingPolicy::new(RetryDirective::Fatal, None)
        } else {
            ErrorHandlingPolicy::new(RetryDirective::Retry, None)
        };
    }

    policy_for_kind(error.kind())
}

fn policy_for_kind(kind: ErrorKind) -> ErrorHandlingPolicy {
    match kind {
        // Transient failures of an external system, expected to recover on their own.
        ErrorKind::SourceUnavailable
        | ErrorKind::WriteFailed
        | ErrorKind::ArtifactReadFailed
        | ErrorKind::StagingLoadFailed
        | ErrorKind::MergeFailed
        | ErrorKind::CheckpointLoadFailed
        | ErrorKind::CheckpointSaveFailed
        | ErrorKind::DatabaseUnavailable
        | ErrorKind::DatabaseQueryFailed
        | ErrorKind::IoError
        | ErrorKind::OperationTimedOut => ErrorHandlingPolicy::new(RetryDirective::Retry, None),

        ErrorKind::SourceSchemaMismatch => ErrorHandlingPolicy::new(
            RetryDirective::Fatal,
            Some("Align the table configuration with the source table's columns and restart."),
        ),
        ErrorKind::ConfigError => ErrorHandlingPolicy::new(
            RetryDirective::Fatal,
            Some("Fix the table configuration and restart the replicator."),
        ),
        ErrorKind::InvalidData
        | ErrorKind::ConversionError
        | ErrorKind::SerializationError
        | ErrorKind::DeserializationError => ErrorHandlingPolicy::new(
            RetryDirective::Fatal,
            Some("Inspect the offending rows or artifacts, they cannot be processed as is."),
        ),

        // Fault injection.
        #[cfg(feature = "failpoints")]
        ErrorKind::WithRetry => ErrorHandlingPolicy::new(RetryDirective::Retry, None),
        #[cfg(feature = "failpoints")]
        ErrorKind::WithNoRetry => {
            ErrorHandlingPolicy::new(RetryDirective::Fatal, Some("Cannot retry this error."))
        }

        _ => ErrorHandlingPolicy::new(
            RetryDirective::Fatal,
            Some("There is no prescribed solution for this error, check the logs for details."),
        ),
    }
}

use std::fmt;

use chrono::{DateTime, Utc};

use crate::types::OrderingToken;

/// Stage a sync pipeline is in.
///
/// ```text
/// Idle -> Reading -> Buffering -> Flushing -> Loading -> Materializing -> Checkpointing -> Idle
/// ```
///
/// Retryable stages may re-enter themselves, and any of them may open the circuit. An open
/// circuit resumes the stage that failed once the cooldown elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncPhase {
    Idle,
    Reading,
    Buffering,
    Flushing,
    Loading,
    Materializing,
    Checkpointing,
    CircuitOpen,
    /// The pipeline stopped because of a fatal error.
    Failed,
    /// The pipeline exited after a shutdown request.
    Stopped,
}

impl SyncPhase {
    /// Stages that call into external systems and are retried on transient failures.
    pub fn is_retryable_stage(&self) -> bool {
        matches!(
            self,
            Self::Reading
                | Self::Flushing
                | Self::Loading
                | Self::Materializing
                | Self::Checkpointing
        )
    }

    /// Whether the batch in flight can no longer be abandoned on shutdown.
    pub fn is_past_point_of_no_return(&self) -> bool {
        matches!(
            self,
            Self::Loading | Self::Materializing | Self::Checkpointing
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Stopped)
    }

    pub fn can_transition_to(&self, next: SyncPhase) -> bool {
        use SyncPhase::*;

        if next == Failed || next == Stopped {
            return !self.is_terminal();
        }

        if self.is_retryable_stage() && (next == *self || next == CircuitOpen) {
            return true;
        }

        match (self, next) {
            (CircuitOpen, next) => next.is_retryable_stage(),
            (Idle, Reading | Flushing) => true,
            (Reading, Buffering | Flushing | Idle) => true,
            (Buffering, Reading | Flushing | Idle) => true,
            (Flushing, Loading) => true,
            (Loading, Materializing) => true,
            (Materializing, Checkpointing) => true,
            (Checkpointing, Idle) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Reading => "reading",
            Self::Buffering => "buffering",
            Self::Flushing => "flushing",
            Self::Loading => "loading",
            Self::Materializing => "materializing",
            Self::Checkpointing => "checkpointing",
            Self::CircuitOpen => "circuit_open",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a pipeline's progress, published after every phase change.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncStatus {
    pub phase: SyncPhase,
    pub consecutive_failures: u32,
    pub high_watermark: Option<OrderingToken>,
    /// Commit time of the last saved checkpoint, the "last good" time of a stalled table.
    pub last_checkpoint_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub circuit_open_until: Option<DateTime<Utc>>,
}

impl SyncStatus {
    /// Returns `true` while the table is not advancing because of failures.
    pub fn is_stalled(&self) -> bool {
        matches!(self.phase, SyncPhase::CircuitOpen | SyncPhase::Failed)
    }
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            phase: SyncPhase::Idle,
            consecutive_failures: 0,
            high_watermark: None,
            last_checkpoint_at: None,
            last_error: None,
            circuit_open_until: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_cycle_is_allowed() {
        let cycle = [
            SyncPhase::Idle,
            SyncPhase::Reading,
            SyncPhase::Buffering,
            SyncPhase::Flushing,
            SyncPhase::Loading,
            SyncPhase::Materializing,
            SyncPhase::Checkpointing,
            SyncPhase::Idle,
        ];

        for pair in cycle.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn stages_cannot_be_skipped() {
        assert!(!SyncPhase::Flushing.can_transition_to(SyncPhase::Materializing));
        assert!(!SyncPhase::Loading.can_transition_to(SyncPhase::Checkpointing));
        assert!(!SyncPhase::Materializing.can_transition_to(SyncPhase::Idle));
        assert!(!SyncPhase::Idle.can_transition_to(SyncPhase::Loading));
    }

    #[test]
    fn failures_retry_or_open_the_circuit() {
        assert!(SyncPhase::Loading.can_transition_to(SyncPhase::Loading));
        assert!(SyncPhase::Materializing.can_transition_to(SyncPhase::CircuitOpen));
        assert!(SyncPhase::CircuitOpen.can_transition_to(SyncPhase::Materializing));
        assert!(!SyncPhase::CircuitOpen.can_transition_to(SyncPhase::Idle));
        assert!(!SyncPhase::Buffering.can_transition_to(SyncPhase::Buffering));
    }

    #[test]
    fn terminal_phases_are_final() {
        assert!(SyncPhase::CircuitOpen.can_transition_to(SyncPhase::Stopped));
        assert!(!SyncPhase::Failed.can_transition_to(SyncPhase::Stopped));
        assert!(!SyncPhase::Stopped.can_transition_to(SyncPhase::Idle));
    }
}

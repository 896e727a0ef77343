//! Saga state machine.

use serde::{Deserialize, Serialize};

/// The status of a saga in its lifecycle.
///
/// State transitions:
/// ```text
/// Pending ──► Executing ──┬──► Completed
///                         └──► Failed ──► Compensating ──┬──► Compensated
///                                                        └──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SagaStatus {
    /// Saga has not started yet.
    #[default]
    Pending,

    /// Saga steps are being executed.
    Executing,

    /// All steps completed successfully (terminal state).
    Completed,

    /// A step failed; after compensation this means manual intervention is needed.
    Failed,

    /// Compensating transactions are in progress.
    Compensating,

    /// Every completed step was compensated (terminal state).
    Compensated,
}

impl SagaStatus {
    /// Returns true if the saga can begin running.
    pub fn can_run(&self) -> bool {
        matches!(self, SagaStatus::Pending)
    }

    /// Returns true if the saga can begin compensation.
    pub fn can_compensate(&self) -> bool {
        matches!(self, SagaStatus::Failed)
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStatus::Pending => "Pending",
            SagaStatus::Executing => "Executing",
            SagaStatus::Completed => "Completed",
            SagaStatus::Failed => "Failed",
            SagaStatus::Compensating => "Compensating",
            SagaStatus::Compensated => "Compensated",
        }
    }
}

impl std::fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_status_is_pending() {
        assert_eq!(SagaStatus::default(), SagaStatus::Pending);
    }

    #[test]
    fn test_can_run() {
        assert!(SagaStatus::Pending.can_run());
        assert!(!SagaStatus::Executing.can_run());
        assert!(!SagaStatus::Completed.can_run());
        assert!(!SagaStatus::Compensated.can_run());
    }

    #[test]
    fn test_can_compensate() {
        assert!(SagaStatus::Failed.can_compensate());
        assert!(!SagaStatus::Executing.can_compensate());
        assert!(!SagaStatus::Compensating.can_compensate());
        assert!(!SagaStatus::Completed.can_compensate());
    }

    #[test]
    fn test_serialization() {
        let status = SagaStatus::Compensating;
        let json = serde_json::to_string(&status).unwrap();
        let deserialized: SagaStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(status, deserialized);
    }
}

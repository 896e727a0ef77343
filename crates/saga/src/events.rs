//! Saga lifecycle events.

use chrono::{DateTime, Utc};
use common::{SagaId, WorkflowEvent};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Everything an orchestrator records while running one saga.
///
/// Applying the events in order to a fresh [`SagaContext`](crate::SagaContext)
/// reproduces the context's status and step log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SagaEvent {
    /// The run began; carries the step count.
    SagaStarted(SagaStartedData),

    /// A step's first attempt is about to run.
    StepStarted(StepStartedData),

    /// A step returned a result.
    StepCompleted(StepCompletedData),

    /// A saga step failed after its retries.
    StepFailed(StepFailedData),

    CompensationStarted(CompensationData),

    /// A step's effect was undone.
    CompensationStepCompleted(StepData),

    /// Undoing a step failed; the remaining steps are still undone.
    CompensationStepFailed(StepFailedData),

    /// Every step succeeded.
    SagaCompleted(SagaFinishedData),

    /// A step failed; compensation follows.
    SagaFailed(SagaFailedData),

    /// Every completed step was compensated.
    SagaCompensated(SagaFinishedData),

    /// Compensation finished with at least one failed step.
    CompensationIncomplete(CompensationIncompleteData),
}

impl WorkflowEvent for SagaEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SagaEvent::SagaStarted(_) => "SagaStarted",
            SagaEvent::StepStarted(_) => "StepStarted",
            SagaEvent::StepCompleted(_) => "StepCompleted",
            SagaEvent::StepFailed(_) => "StepFailed",
            SagaEvent::CompensationStarted(_) => "CompensationStarted",
            SagaEvent::CompensationStepCompleted(_) => "CompensationStepCompleted",
            SagaEvent::CompensationStepFailed(_) => "CompensationStepFailed",
            SagaEvent::SagaCompleted(_) => "SagaCompleted",
            SagaEvent::SagaFailed(_) => "SagaFailed",
            SagaEvent::SagaCompensated(_) => "SagaCompensated",
            SagaEvent::CompensationIncomplete(_) => "CompensationIncomplete",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaStartedData {
    pub saga_id: SagaId,
    /// Workflow name, such as `OrderPlacement`.
    pub saga_type: String,
    pub correlation_id: String,
    /// Number of steps the saga will run.
    pub step_count: usize,
    pub started_at: DateTime<Utc>,
}

/// Payload of events that only name a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepData {
    pub step_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepStartedData {
    pub step_name: String,
    /// Zero-based position of the step.
    pub index: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepCompletedData {
    pub step_name: String,
    /// The value the step returned; later steps read it from the context.
    pub result: Value,
    /// Attempts made, including the successful one.
    pub attempts: u32,
}

/// Shared by forward and compensation failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepFailedData {
    pub step_name: String,
    pub error: String,
    pub attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompensationData {
    /// The step whose failure triggered compensation.
    pub from_step: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaFinishedData {
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaFailedData {
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompensationIncompleteData {
    /// Steps whose compensation failed, in the order they were attempted.
    pub failed_steps: Vec<String>,
    pub finished_at: DateTime<Utc>,
}

impl SagaEvent {
    pub fn saga_started(
        saga_id: SagaId,
        saga_type: impl Into<String>,
        correlation_id: impl Into<String>,
        step_count: usize,
    ) -> Self {
        SagaEvent::SagaStarted(SagaStartedData {
            saga_id,
            saga_type: saga_type.into(),
            correlation_id: correlation_id.into(),
            step_count,
            started_at: Utc::now(),
        })
    }

    pub fn step_started(step_name: impl Into<String>, index: usize) -> Self {
        SagaEvent::StepStarted(StepStartedData {
            step_name: step_name.into(),
            index,
        })
    }

    pub fn step_completed(step_name: impl Into<String>, result: Value, attempts: u32) -> Self {
        SagaEvent::StepCompleted(StepCompletedData {
            step_name: step_name.into(),
            result,
            attempts,
        })
    }

    pub fn step_failed(
        step_name: impl Into<String>,
        error: impl Into<String>,
        attempts: u32,
    ) -> Self {
        SagaEvent::StepFailed(StepFailedData {
            step_name: step_name.into(),
            error: error.into(),
            attempts,
        })
    }

    pub fn compensation_started(from_step: impl Into<String>) -> Self {
        SagaEvent::CompensationStarted(CompensationData {
            from_step: from_step.into(),
        })
    }

    pub fn compensation_step_completed(step_name: impl Into<String>) -> Self {
        SagaEvent::CompensationStepCompleted(StepData {
            step_name: step_name.into(),
        })
    }

    /// Compensations run once, so `attempts` is always 1.
    pub fn compensation_step_failed(step_name: impl Into<String>, error: impl Into<String>) -> Self {
        SagaEvent::CompensationStepFailed(StepFailedData {
            step_name: step_name.into(),
            error: error.into(),
            attempts: 1,
        })
    }

    pub fn saga_completed() -> Self {
        SagaEvent::SagaCompleted(SagaFinishedData {
            finished_at: Utc::now(),
        })
    }

    pub fn saga_failed(reason: impl Into<String>) -> Self {
        SagaEvent::SagaFailed(SagaFailedData {
            reason: reason.into(),
            failed_at: Utc::now(),
        })
    }

    pub fn saga_compensated() -> Self {
        SagaEvent::SagaCompensated(SagaFinishedData {
            finished_at: Utc::now(),
        })
    }

    pub fn compensation_incomplete(failed_steps: Vec<String>) -> Self {
        SagaEvent::CompensationIncomplete(CompensationIncompleteData {
            failed_steps,
            finished_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_names() {
        assert_eq!(
            SagaEvent::saga_started(SagaId::new(), "OrderPlacement", "c-1", 3).event_type(),
            "SagaStarted"
        );
        assert_eq!(
            SagaEvent::step_failed("pay", "declined", 1).event_type(),
            "StepFailed"
        );
        assert_eq!(
            SagaEvent::compensation_incomplete(vec!["a".into()]).event_type(),
            "CompensationIncomplete"
        );
    }

    #[test]
    fn test_tagged_serialization() {
        let event = SagaEvent::step_completed("reserve", serde_json::json!({"id": 1}), 2);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "StepCompleted");
        assert_eq!(json["data"]["step_name"], "reserve");
        assert_eq!(json["data"]["attempts"], 2);

        let back: SagaEvent = serde_json::from_value(json).unwrap();
        assert!(matches!(back, SagaEvent::StepCompleted(d) if d.result["id"] == 1));
    }
}

//! Saga instance state.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use common::SagaId;
use resilience::ServiceError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::events::SagaEvent;
use crate::state::SagaStatus;

/// The state of one saga run.
///
/// The context is only changed by applying [`SagaEvent`]s, so a sequence
/// of events fully describes how a saga got to where it is. Step results
/// are keyed by step name and are the only way steps pass data forward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaContext {
    pub id: SagaId,
    pub saga_type: String,
    pub correlation_id: String,
    /// Request data the saga was started with.
    pub input: Value,
    /// Names of completed steps, in completion order.
    pub executed_steps: Vec<String>,
    pub results: HashMap<String, Value>,
    pub current_step: usize,
    pub status: SagaStatus,
    pub error: Option<String>,
    /// Steps whose compensation failed.
    pub failed_compensations: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SagaContext {
    /// Creates a pending saga context.
    pub fn new(saga_type: impl Into<String>, correlation_id: impl Into<String>, input: Value) -> Self {
        let now = Utc::now();
        Self {
            id: SagaId::new(),
            saga_type: saga_type.into(),
            correlation_id: correlation_id.into(),
            input,
            executed_steps: Vec::new(),
            results: HashMap::new(),
            current_step: 0,
            status: SagaStatus::Pending,
            error: None,
            failed_compensations: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Applies an event to the context.
    pub fn apply(&mut self, event: &SagaEvent) {
        match event {
            SagaEvent::SagaStarted(data) => {
                self.id = data.saga_id;
                self.status = SagaStatus::Executing;
            }
            SagaEvent::StepStarted(data) => {
                self.current_step = data.index;
            }
            SagaEvent::StepCompleted(data) => {
                self.executed_steps.push(data.step_name.clone());
                self.results
                    .insert(data.step_name.clone(), data.result.clone());
            }
            SagaEvent::StepFailed(data) => {
                self.error = Some(data.error.clone());
            }
            SagaEvent::SagaCompleted(_) => {
                self.status = SagaStatus::Completed;
            }
            SagaEvent::SagaFailed(data) => {
                self.status = SagaStatus::Failed;
                self.error = Some(data.reason.clone());
            }
            SagaEvent::CompensationStarted(_) => {
                self.status = SagaStatus::Compensating;
            }
            SagaEvent::CompensationStepCompleted(_) => {}
            SagaEvent::CompensationStepFailed(data) => {
                self.failed_compensations.push(data.step_name.clone());
            }
            SagaEvent::SagaCompensated(_) => {
                self.status = SagaStatus::Compensated;
            }
            SagaEvent::CompensationIncomplete(_) => {
                self.status = SagaStatus::Failed;
            }
        }
        self.updated_at = Utc::now();
    }

    /// Returns the raw result of a completed step.
    pub fn result(&self, step: &str) -> Option<&Value> {
        self.results.get(step)
    }

    /// Decodes the result of a completed step.
    pub fn result_as<T: DeserializeOwned>(&self, step: &str) -> Result<T, ServiceError> {
        let value = self.result(step).ok_or_else(|| {
            ServiceError::InvalidPayload(format!("no result recorded for step '{step}'"))
        })?;
        Ok(serde_json::from_value(value.clone())?)
    }

    /// Decodes the saga input.
    pub fn input_as<T: DeserializeOwned>(&self) -> Result<T, ServiceError> {
        Ok(serde_json::from_value(self.input.clone())?)
    }
}

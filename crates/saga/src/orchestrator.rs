//! Saga orchestrator.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use common::{EventSink, InMemoryStateStore, SagaId, StateStore, TracingEventSink};
use resilience::{ResilientCallExecutor, RetryExecutor, RetryPolicy, ServiceError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::SagaContext;
use crate::error::SagaError;
use crate::events::SagaEvent;
use crate::state::SagaStatus;
use crate::step::SagaStep;

/// Outcome of a saga run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaResult {
    pub saga_id: SagaId,
    pub status: SagaStatus,
    pub success: bool,
    /// Step results keyed by step name, present on success.
    pub payload: Option<Value>,
    pub error: Option<String>,
    /// True when a step failed and rollback was attempted.
    pub compensation_executed: bool,
    pub executed_steps: Vec<String>,
    pub failed_compensations: Vec<String>,
}

impl SagaResult {
    fn from_context(ctx: &SagaContext, compensation_executed: bool) -> Self {
        let success = ctx.status == SagaStatus::Completed;
        let payload = success.then(|| {
            Value::Object(
                ctx.results
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            )
        });
        Self {
            saga_id: ctx.id,
            status: ctx.status,
            success,
            payload,
            error: ctx.error.clone(),
            compensation_executed,
            executed_steps: ctx.executed_steps.clone(),
            failed_compensations: ctx.failed_compensations.clone(),
        }
    }
}

/// Runs sagas step by step and compensates on failure.
///
/// Every event is applied to the context, emitted to the sink and the
/// resulting context is written to the state store, so the store always
/// holds the latest known state of each saga.
pub struct SagaOrchestrator {
    executor: ResilientCallExecutor,
    retry: RetryExecutor,
    policy: RetryPolicy,
    store: Arc<dyn StateStore<SagaId, SagaContext>>,
    sink: Arc<dyn EventSink<SagaEvent>>,
}

impl SagaOrchestrator {
    /// Creates an orchestrator with an in-memory state store and a tracing sink.
    ///
    /// `policy` caps every step's retries and supplies the backoff.
    pub fn new(executor: ResilientCallExecutor, policy: RetryPolicy) -> Self {
        Self {
            executor,
            retry: RetryExecutor::new(),
            policy,
            store: Arc::new(InMemoryStateStore::new()),
            sink: Arc::new(TracingEventSink),
        }
    }

    /// Replaces the state store.
    pub fn with_store(mut self, store: Arc<dyn StateStore<SagaId, SagaContext>>) -> Self {
        self.store = store;
        self
    }

    /// Replaces the event sink.
    pub fn with_sink(mut self, sink: Arc<dyn EventSink<SagaEvent>>) -> Self {
        self.sink = sink;
        self
    }

    /// Returns the call executor used for steps that name a dependency.
    pub fn executor(&self) -> &ResilientCallExecutor {
        &self.executor
    }

    /// Loads the latest state of a saga.
    pub async fn get_saga(&self, saga_id: SagaId) -> Option<SagaContext> {
        self.store.get(&saga_id).await
    }

    /// Executes `steps` in order against `context`.
    ///
    /// On the first step that fails for good, the already completed steps
    /// are compensated in reverse order. Step failures are reported in the
    /// returned [`SagaResult`]; `Err` is only returned for misuse such as a
    /// context that already ran.
    #[tracing::instrument(
        skip_all,
        fields(saga_id = %context.id, saga_type = %context.saga_type, steps = steps.len())
    )]
    pub async fn run(
        &self,
        steps: &[Arc<dyn SagaStep>],
        mut context: SagaContext,
    ) -> Result<SagaResult, SagaError> {
        if !context.status.can_run() {
            return Err(SagaError::InvalidState {
                expected: "Pending",
                actual: context.status,
            });
        }
        let mut seen = HashSet::new();
        for step in steps {
            if !seen.insert(step.name()) {
                return Err(SagaError::DuplicateStep(step.name().to_string()));
            }
        }

        let saga_type = context.saga_type.clone();
        metrics::counter!("saga_executions_total", "saga_type" => saga_type.clone()).increment(1);
        let start = Instant::now();

        let started = SagaEvent::saga_started(
            context.id,
            context.saga_type.clone(),
            context.correlation_id.clone(),
            steps.len(),
        );
        self.record(&mut context, started).await;

        for (index, step) in steps.iter().enumerate() {
            self.record(&mut context, SagaEvent::step_started(step.name(), index))
                .await;

            match self.execute_step(step.as_ref(), &context).await {
                Ok((value, attempts)) => {
                    tracing::info!(step = step.name(), attempts, "step completed");
                    self.record(
                        &mut context,
                        SagaEvent::step_completed(step.name(), value, attempts),
                    )
                    .await;
                }
                Err(error) => {
                    let attempts = error.retry_metrics().map_or(1, |m| m.attempts);
                    let failure = SagaError::StepFailed {
                        step: step.name().to_string(),
                        source: error,
                    };
                    tracing::warn!(step = step.name(), attempts, error = %failure, "step failed");

                    self.record(
                        &mut context,
                        SagaEvent::step_failed(step.name(), failure.to_string(), attempts),
                    )
                    .await;
                    self.record(&mut context, SagaEvent::saga_failed(failure.to_string()))
                        .await;

                    self.compensate(steps, &mut context, step.name()).await;

                    let outcome = if context.status == SagaStatus::Compensated {
                        "compensated"
                    } else {
                        "failed"
                    };
                    metrics::counter!(
                        "saga_finished_total",
                        "saga_type" => saga_type.clone(),
                        "outcome" => outcome
                    )
                    .increment(1);
                    metrics::histogram!("saga_duration_seconds", "saga_type" => saga_type)
                        .record(start.elapsed().as_secs_f64());

                    return Ok(SagaResult::from_context(&context, true));
                }
            }
        }

        self.record(&mut context, SagaEvent::saga_completed()).await;
        tracing::info!("saga completed");

        metrics::counter!(
            "saga_finished_total",
            "saga_type" => saga_type.clone(),
            "outcome" => "completed"
        )
        .increment(1);
        metrics::histogram!("saga_duration_seconds", "saga_type" => saga_type)
            .record(start.elapsed().as_secs_f64());

        Ok(SagaResult::from_context(&context, false))
    }

    /// Effective policy for a step: its own retry bound capped by ours.
    fn step_policy(&self, step: &dyn SagaStep) -> RetryPolicy {
        let retries = if step.retryable() {
            step.max_retries().min(self.policy.max_retries)
        } else {
            0
        };
        self.policy.clone().with_max_retries(retries)
    }

    async fn execute_step(
        &self,
        step: &dyn SagaStep,
        context: &SagaContext,
    ) -> Result<(Value, u32), ServiceError> {
        let policy = self.step_policy(step);
        let outcome = match step.service() {
            Some(service) => {
                self.executor
                    .call_with_metrics(service, &policy, || step.execute(context))
                    .await
            }
            None => {
                self.retry
                    .execute_with_metrics(step.name(), &policy, || step.execute(context))
                    .await
            }
        };
        outcome.map(|(value, metrics)| (value, metrics.attempts))
    }

    /// Compensates completed steps in reverse order. A failed compensation
    /// is recorded and the remaining ones still run.
    #[tracing::instrument(skip(self, steps, context), fields(saga_id = %context.id))]
    async fn compensate(
        &self,
        steps: &[Arc<dyn SagaStep>],
        context: &mut SagaContext,
        failed_step: &str,
    ) {
        if !context.status.can_compensate() {
            tracing::warn!(status = %context.status, "saga is not in a compensable state");
            return;
        }
        self.record(context, SagaEvent::compensation_started(failed_step))
            .await;

        let executed: Vec<String> = context.executed_steps.iter().rev().cloned().collect();
        for name in executed {
            let Some(step) = steps.iter().find(|s| s.name() == name) else {
                continue;
            };
            let result = context.result(&name).cloned().unwrap_or(Value::Null);

            match step.compensate(context, &result).await {
                Ok(()) => {
                    tracing::info!(step = %name, "step compensated");
                    self.record(context, SagaEvent::compensation_step_completed(&name))
                        .await;
                }
                Err(error) => {
                    let failure = SagaError::CompensationFailed {
                        step: name.clone(),
                        source: error,
                    };
                    tracing::error!(step = %name, error = %failure, "compensation failed");
                    metrics::counter!("saga_compensation_failures_total", "step" => name.clone())
                        .increment(1);
                    self.record(
                        context,
                        SagaEvent::compensation_step_failed(&name, failure.to_string()),
                    )
                    .await;
                }
            }
        }

        if context.failed_compensations.is_empty() {
            self.record(context, SagaEvent::saga_compensated()).await;
        } else {
            let failed = context.failed_compensations.clone();
            tracing::error!(?failed, "saga requires manual intervention");
            self.record(context, SagaEvent::compensation_incomplete(failed))
                .await;
        }
    }

    /// Applies, emits and persists one event.
    async fn record(&self, context: &mut SagaContext, event: SagaEvent) {
        context.apply(&event);
        self.sink.emit(&event);
        self.store.put(context.id, context.clone()).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use common::{RecordingEventSink, WorkflowEvent};
    use parking_lot::Mutex;
    use resilience::CircuitBreakerRegistry;
    use serde_json::json;

    use super::*;

    /// Test step that fails a scripted number of times and logs its
    /// executions and compensations into a shared journal.
    struct ScriptedStep {
        name: String,
        failures: AtomicU32,
        fail_compensation: bool,
        retryable: bool,
        calls: AtomicU32,
        journal: Arc<Mutex<Vec<String>>>,
    }

    impl ScriptedStep {
        fn new(name: &str, journal: &Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                name: name.to_string(),
                failures: AtomicU32::new(0),
                fail_compensation: false,
                retryable: true,
                calls: AtomicU32::new(0),
                journal: Arc::clone(journal),
            }
        }

        fn failing(self, times: u32) -> Self {
            self.failures.store(times, Ordering::SeqCst);
            self
        }

        fn bad_compensation(mut self) -> Self {
            self.fail_compensation = true;
            self
        }

        fn not_retryable(mut self) -> Self {
            self.retryable = false;
            self
        }
    }

    #[async_trait]
    impl SagaStep for ScriptedStep {
        fn name(&self) -> &str {
            &self.name
        }

        fn retryable(&self) -> bool {
            self.retryable
        }

        async fn execute(&self, _ctx: &SagaContext) -> Result<Value, ServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(ServiceError::unavailable(format!("{} down", self.name)));
            }
            self.journal.lock().push(format!("run:{}", self.name));
            Ok(json!({ "step": self.name }))
        }

        async fn compensate(&self, _ctx: &SagaContext, result: &Value) -> Result<(), ServiceError> {
            assert_eq!(result["step"], self.name.as_str());
            if self.fail_compensation {
                return Err(ServiceError::Other("undo failed".into()));
            }
            self.journal.lock().push(format!("undo:{}", self.name));
            Ok(())
        }
    }

    fn orchestrator(sink: RecordingEventSink<SagaEvent>) -> SagaOrchestrator {
        let executor = ResilientCallExecutor::new(Arc::new(CircuitBreakerRegistry::default()));
        let policy = RetryPolicy::exponential(3, Duration::from_millis(10));
        SagaOrchestrator::new(executor, policy).with_sink(Arc::new(sink))
    }

    fn context() -> SagaContext {
        SagaContext::new("Test", "corr-1", Value::Null)
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_steps_succeed() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let steps: Vec<Arc<dyn SagaStep>> = vec![
            Arc::new(ScriptedStep::new("a", &journal)),
            Arc::new(ScriptedStep::new("b", &journal)),
        ];
        let sink = RecordingEventSink::new();
        let orchestrator = orchestrator(sink.clone());

        let result = orchestrator.run(&steps, context()).await.unwrap();

        assert!(result.success);
        assert_eq!(result.status, SagaStatus::Completed);
        assert!(!result.compensation_executed);
        assert_eq!(result.payload.unwrap()["b"]["step"], "b");
        assert_eq!(*journal.lock(), vec!["run:a", "run:b"]);
        assert_eq!(
            sink.event_types(),
            vec![
                "SagaStarted",
                "StepStarted",
                "StepCompleted",
                "StepStarted",
                "StepCompleted",
                "SagaCompleted"
            ]
        );

        let stored = orchestrator.get_saga(result.saga_id).await.unwrap();
        assert_eq!(stored.status, SagaStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_compensates_in_reverse() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let failing = Arc::new(ScriptedStep::new("c", &journal).failing(u32::MAX));
        let steps: Vec<Arc<dyn SagaStep>> = vec![
            Arc::new(ScriptedStep::new("a", &journal)),
            Arc::new(ScriptedStep::new("b", &journal)),
            failing.clone(),
        ];
        let orchestrator = orchestrator(RecordingEventSink::new());

        let result = orchestrator.run(&steps, context()).await.unwrap();

        assert!(!result.success);
        assert!(result.compensation_executed);
        assert_eq!(result.status, SagaStatus::Compensated);
        assert!(result.payload.is_none());
        assert!(result.error.unwrap().contains("'c'"));
        // 1 attempt + 3 retries
        assert_eq!(failing.calls.load(Ordering::SeqCst), 4);
        assert_eq!(
            *journal.lock(),
            vec!["run:a", "run:b", "undo:b", "undo:a"]
        );
    }

    #[tokio::test]
    async fn test_compensation_requires_failed_saga() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let steps: Vec<Arc<dyn SagaStep>> = vec![Arc::new(ScriptedStep::new("a", &journal))];
        let sink = RecordingEventSink::new();
        let orchestrator = orchestrator(sink.clone());

        let mut ctx = context();
        let id = ctx.id;
        ctx.apply(&SagaEvent::saga_started(id, "Test", "corr-1", 1));
        ctx.apply(&SagaEvent::step_completed("a", json!({ "step": "a" }), 1));

        orchestrator.compensate(&steps, &mut ctx, "a").await;

        assert_eq!(ctx.status, SagaStatus::Executing);
        assert!(journal.lock().is_empty());
        assert!(sink.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_compensation_continues_after_failure() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let steps: Vec<Arc<dyn SagaStep>> = vec![
            Arc::new(ScriptedStep::new("a", &journal)),
            Arc::new(ScriptedStep::new("b", &journal).bad_compensation()),
            Arc::new(ScriptedStep::new("c", &journal).failing(u32::MAX)),
        ];
        let sink = RecordingEventSink::new();
        let orchestrator = orchestrator(sink.clone());

        let result = orchestrator.run(&steps, context()).await.unwrap();

        assert!(!result.success);
        assert!(result.compensation_executed);
        assert_eq!(result.status, SagaStatus::Failed);
        assert_eq!(result.failed_compensations, vec!["b"]);
        assert_eq!(*journal.lock(), vec!["run:a", "run:b", "undo:a"]);
        assert_eq!(
            sink.event_types().last().copied(),
            Some("CompensationIncomplete")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_is_retried() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let flaky = Arc::new(ScriptedStep::new("flaky", &journal).failing(2));
        let steps: Vec<Arc<dyn SagaStep>> = vec![flaky.clone()];
        let sink = RecordingEventSink::new();
        let orchestrator = orchestrator(sink.clone());

        let result = orchestrator.run(&steps, context()).await.unwrap();

        assert!(result.success);
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
        let completed = sink
            .events()
            .into_iter()
            .find_map(|e| match e {
                SagaEvent::StepCompleted(data) => Some(data.attempts),
                _ => None,
            })
            .unwrap();
        assert_eq!(completed, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_step_runs_once() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let step = Arc::new(ScriptedStep::new("once", &journal).failing(1).not_retryable());
        let steps: Vec<Arc<dyn SagaStep>> = vec![step.clone()];
        let orchestrator = orchestrator(RecordingEventSink::new());

        let result = orchestrator.run(&steps, context()).await.unwrap();

        assert!(!result.success);
        assert_eq!(step.calls.load(Ordering::SeqCst), 1);
        // nothing completed, so there was nothing to undo
        assert_eq!(result.status, SagaStatus::Compensated);
    }

    #[tokio::test]
    async fn test_rejects_duplicate_step_names() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let steps: Vec<Arc<dyn SagaStep>> = vec![
            Arc::new(ScriptedStep::new("a", &journal)),
            Arc::new(ScriptedStep::new("a", &journal)),
        ];
        let orchestrator = orchestrator(RecordingEventSink::new());
        assert!(matches!(
            orchestrator.run(&steps, context()).await,
            Err(SagaError::DuplicateStep(name)) if name == "a"
        ));
    }

    #[tokio::test]
    async fn test_rejects_context_that_already_ran() {
        let orchestrator = orchestrator(RecordingEventSink::new());
        let mut ctx = context();
        ctx.status = SagaStatus::Completed;
        assert!(matches!(
            orchestrator.run(&[], ctx).await,
            Err(SagaError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_step_policy_is_capped() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let executor = ResilientCallExecutor::new(Arc::new(CircuitBreakerRegistry::default()));
        let orchestrator =
            SagaOrchestrator::new(executor, RetryPolicy::exponential(2, Duration::from_millis(1)));

        let step = ScriptedStep::new("a", &journal);
        assert_eq!(orchestrator.step_policy(&step).max_retries, 2);
        let step = ScriptedStep::new("b", &journal).not_retryable();
        assert_eq!(orchestrator.step_policy(&step).max_retries, 0);
    }

    #[test]
    fn test_events_are_workflow_events() {
        let event = SagaEvent::saga_completed();
        assert_eq!(event.event_type(), "SagaCompleted");
    }
}

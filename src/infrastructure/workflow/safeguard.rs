//! Bounded execute-and-correct loop around query execution

use tracing::{info, warn};

use super::runner::StepRunner;
use crate::domain::workflow::{ExecutionContext, StepKind, StepRegistry, WorkflowError};

/// How the safeguard loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafeguardOutcome {
    /// An execution succeeded
    Succeeded,
    /// The attempt ceiling was reached
    Exhausted,
    /// The correction step failed or produced no change
    Uncorrectable,
}

/// Runs the execute step, and the correct step after each recoverable
/// failure, until an execution succeeds or `max_attempts` executions have
/// failed. `retry_count` on the context counts failed executions, so the
/// ceiling holds across suspend and resume.
#[derive(Debug, Clone)]
pub struct SafeguardLoop {
    max_attempts: u32,
    execute: StepKind,
    correct: StepKind,
}

impl SafeguardLoop {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            execute: StepKind::ExecuteQuery,
            correct: StepKind::CorrectQuery,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn steps(&self) -> [StepKind; 2] {
        [self.execute, self.correct]
    }

    pub async fn run(
        &self,
        runner: &StepRunner,
        registry: &StepRegistry,
        ctx: &mut ExecutionContext,
    ) -> Result<SafeguardOutcome, WorkflowError> {
        loop {
            if ctx.retry_count >= self.max_attempts {
                return Ok(SafeguardOutcome::Exhausted);
            }

            runner.run_kind(registry, self.execute, ctx).await?;

            if !ctx.flags.query_error {
                return Ok(SafeguardOutcome::Succeeded);
            }

            ctx.retry_count += 1;
            warn!(
                execution_id = %ctx.execution_id,
                attempt = ctx.retry_count,
                error = ctx.progress.query_error.as_deref().unwrap_or(""),
                "Query execution failed"
            );

            if ctx.retry_count >= self.max_attempts {
                info!(execution_id = %ctx.execution_id, "Query attempts exhausted");
                return Ok(SafeguardOutcome::Exhausted);
            }

            ctx.flags.query_changed = false;
            if let Err(e) = runner.run_kind(registry, self.correct, ctx).await {
                warn!(execution_id = %ctx.execution_id, error = %e, "Query correction failed");
                return Ok(SafeguardOutcome::Uncorrectable);
            }

            if !ctx.flags.query_changed {
                info!(execution_id = %ctx.execution_id, "Correction left the query unchanged");
                return Ok(SafeguardOutcome::Uncorrectable);
            }

            ctx.clear_query_error();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::domain::workflow::step::mock::{CallLog, ScriptedStep};
    use crate::domain::workflow::{FamilyPayload, RequestFields};
    use crate::infrastructure::trace::InMemoryTraceRecorder;

    fn context() -> ExecutionContext {
        let mut ctx = ExecutionContext::new(
            RequestFields::new("q", "u", "c"),
            FamilyPayload::TableSql,
        );
        ctx.progress.query = Some("SELECT 1".to_string());
        ctx
    }

    /// Execute step failing the first `failures` times
    fn registry(log: &CallLog, failures: u32, correction_changes: bool) -> StepRegistry {
        let calls = Arc::new(AtomicU32::new(0));
        StepRegistry::new()
            .with_step(ScriptedStep::new(StepKind::ExecuteQuery, log, move |ctx| {
                if calls.fetch_add(1, Ordering::SeqCst) < failures {
                    ctx.record_query_error("relation does not exist");
                } else {
                    ctx.record_rows(vec![]);
                }
                Ok(())
            }))
            .with_step(ScriptedStep::new(StepKind::CorrectQuery, log, move |ctx| {
                ctx.flags.query_changed = correction_changes;
                Ok(())
            }))
    }

    fn runner() -> StepRunner {
        StepRunner::new(Arc::new(InMemoryTraceRecorder::new()))
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let log = CallLog::new();
        let mut ctx = context();

        let outcome = SafeguardLoop::new(3)
            .run(&runner(), &registry(&log, 0, true), &mut ctx)
            .await
            .unwrap();

        assert_eq!(outcome, SafeguardOutcome::Succeeded);
        assert_eq!(ctx.retry_count, 0);
        assert_eq!(log.calls(), vec![StepKind::ExecuteQuery]);
    }

    #[tokio::test]
    async fn test_one_correction_then_success() {
        let log = CallLog::new();
        let mut ctx = context();

        let outcome = SafeguardLoop::new(3)
            .run(&runner(), &registry(&log, 1, true), &mut ctx)
            .await
            .unwrap();

        assert_eq!(outcome, SafeguardOutcome::Succeeded);
        assert_eq!(ctx.retry_count, 1);
        assert!(!ctx.flags.query_error);
        assert_eq!(
            log.calls(),
            vec![StepKind::ExecuteQuery, StepKind::CorrectQuery, StepKind::ExecuteQuery]
        );
    }

    #[tokio::test]
    async fn test_exhausted_after_three_failures() {
        let log = CallLog::new();
        let mut ctx = context();

        let outcome = SafeguardLoop::new(3)
            .run(&runner(), &registry(&log, 10, true), &mut ctx)
            .await
            .unwrap();

        assert_eq!(outcome, SafeguardOutcome::Exhausted);
        assert_eq!(ctx.retry_count, 3);
        assert_eq!(log.count(StepKind::ExecuteQuery), 3);
        assert_eq!(log.count(StepKind::CorrectQuery), 2);
    }

    #[tokio::test]
    async fn test_unchanged_correction_stops() {
        let log = CallLog::new();
        let mut ctx = context();

        let outcome = SafeguardLoop::new(3)
            .run(&runner(), &registry(&log, 10, false), &mut ctx)
            .await
            .unwrap();

        assert_eq!(outcome, SafeguardOutcome::Uncorrectable);
        assert_eq!(ctx.retry_count, 1);
        assert_eq!(log.count(StepKind::ExecuteQuery), 1);
    }

    #[tokio::test]
    async fn test_ceiling_respected_for_resumed_context() {
        let log = CallLog::new();
        let mut ctx = context();
        ctx.retry_count = 3;

        let outcome = SafeguardLoop::new(3)
            .run(&runner(), &registry(&log, 0, true), &mut ctx)
            .await
            .unwrap();

        assert_eq!(outcome, SafeguardOutcome::Exhausted);
        assert!(log.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failing_correction_is_uncorrectable() {
        let log = CallLog::new();
        let registry = StepRegistry::new()
            .with_step(ScriptedStep::new(StepKind::ExecuteQuery, &log, |ctx| {
                ctx.record_query_error("syntax error");
                Ok(())
            }))
            .with_step(ScriptedStep::new(StepKind::CorrectQuery, &log, |_| {
                Err(WorkflowError::step_execution("correct_query", "llm down"))
            }));
        let mut ctx = context();

        let outcome = SafeguardLoop::new(3)
            .run(&runner(), &registry, &mut ctx)
            .await
            .unwrap();

        assert_eq!(outcome, SafeguardOutcome::Uncorrectable);
    }

    #[tokio::test]
    async fn test_execute_step_error_propagates() {
        let log = CallLog::new();
        let registry = StepRegistry::new()
            .with_step(ScriptedStep::new(StepKind::ExecuteQuery, &log, |_| {
                Err(WorkflowError::step_execution("execute_query", "no database"))
            }))
            .with_step(ScriptedStep::noop(StepKind::CorrectQuery, &log));
        let mut ctx = context();

        let err = SafeguardLoop::new(3)
            .run(&runner(), &registry, &mut ctx)
            .await
            .unwrap_err();

        assert!(matches!(err, WorkflowError::StepExecution { .. }));
    }
}

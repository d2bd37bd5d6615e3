//! Pipeline controllers
//!
//! Each controller is an explicit state machine over its family's stage enum.
//! A controller drives a context until it is terminal or suspended, then
//! persists it. Step failures never escape a controller: they become a
//! failed context with an apology answer.

mod semantic_query;
mod small_talk;
mod supervisor;
mod table_sql;
mod tool_use;

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};

use super::messages;
use super::runner::StepRunner;
use super::steps::{merge_clarification, Clock};
use crate::domain::workflow::{
    Checkpoint, ClarificationInput, ExecutionContext, ExecutionId,
    StateStore, StepKind, StepRegistry, WorkflowError, WorkflowFamily,
};

pub use semantic_query::SemanticQueryController;
pub use small_talk::SmallTalkController;
pub use supervisor::SupervisorController;
pub use table_sql::TableSqlController;
pub use tool_use::ToolUseController;

/// Drives one workflow family
#[async_trait]
pub trait Controller: Send + Sync + Debug {
    fn family(&self) -> WorkflowFamily;

    /// Store a fresh context and run it until it is terminal or suspended
    async fn execute(&self, ctx: ExecutionContext) -> Result<ExecutionContext, WorkflowError>;

    /// Merge `input` into a suspended context and continue from its checkpoint
    async fn resume(
        &self,
        id: &ExecutionId,
        input: &ClarificationInput,
    ) -> Result<ExecutionContext, WorkflowError>;
}

/// What every controller shares: the step runner, the registry and the store
#[derive(Debug, Clone)]
pub struct PipelineCore {
    runner: Arc<StepRunner>,
    registry: Arc<StepRegistry>,
    store: Arc<dyn StateStore>,
    clock: Clock,
}

impl PipelineCore {
    pub fn new(
        runner: Arc<StepRunner>,
        registry: Arc<StepRegistry>,
        store: Arc<dyn StateStore>,
    ) -> Self {
        Self {
            runner,
            registry,
            store,
            clock: Clock::system(),
        }
    }

    /// Clock used to validate periods supplied on resume
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Fail unless every step in `required` is registered
    pub fn require(&self, required: &[StepKind]) -> Result<(), WorkflowError> {
        self.registry.validate(required)
    }

    pub fn runner(&self) -> &StepRunner {
        &self.runner
    }

    pub fn registry(&self) -> &StepRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    pub async fn run(&self, kind: StepKind, ctx: &mut ExecutionContext) -> Result<(), WorkflowError> {
        self.runner.run_kind(&self.registry, kind, ctx).await
    }

    /// Insert a fresh context of `family` into the store
    pub async fn admit(&self, ctx: &ExecutionContext, family: WorkflowFamily) -> Result<(), WorkflowError> {
        ctx.ensure_family(family)?;
        info!(execution_id = %ctx.execution_id, family = %family, "Workflow started");
        self.store.create(ctx.clone()).await
    }

    /// Turn the result of a drive into the context's final state and persist
    /// it. A drive that ends neither terminal nor suspended is a failure.
    pub async fn settle(
        &self,
        ctx: &mut ExecutionContext,
        result: Result<(), WorkflowError>,
    ) -> Result<(), WorkflowError> {
        let result = result.and_then(|()| {
            if ctx.is_terminal() || ctx.is_suspended() {
                Ok(())
            } else {
                Err(WorkflowError::step_execution(
                    "controller",
                    "pipeline ended without an outcome",
                ))
            }
        });

        if let Err(err) = result {
            error!(execution_id = %ctx.execution_id, error = %err, "Workflow failed");
            ctx.fail(messages::error_answer(&err));
        }

        info!(execution_id = %ctx.execution_id, status = %ctx.status, "Workflow settled");
        self.store.put(ctx.clone()).await
    }

    /// Atomically take a suspended context for resumption. With `input`, the
    /// clarification is merged into it, a period held to the extraction
    /// rules; without, only the suspension is cleared. The store is
    /// untouched when this fails.
    pub async fn claim(
        &self,
        id: &ExecutionId,
        family: WorkflowFamily,
        input: Option<ClarificationInput>,
    ) -> Result<ExecutionContext, WorkflowError> {
        let today = self.clock.today();
        let mut ctx = self
            .store
            .update(
                id,
                Box::new(move |ctx| {
                    ctx.ensure_family(family)?;
                    match input {
                        Some(ref input) => merge_clarification(ctx, input, today),
                        None if ctx.flags.awaiting_clarification => {
                            ctx.clear_clarification();
                            Ok(())
                        }
                        None => Err(WorkflowError::not_awaiting_clarification(
                            ctx.execution_id.as_str(),
                        )),
                    }
                }),
            )
            .await?;

        info!(execution_id = %id, family = %family, "Workflow resumed");
        ctx.trace_id = None;
        Ok(ctx)
    }
}

/// Suspend `ctx` at `checkpoint` if the last step asked for clarification
pub fn suspend_if_awaiting(ctx: &mut ExecutionContext, checkpoint: Checkpoint) -> bool {
    if ctx.flags.awaiting_clarification {
        info!(execution_id = %ctx.execution_id, checkpoint = ?checkpoint, "Workflow suspended for clarification");
        ctx.suspend(checkpoint);
        true
    } else {
        false
    }
}

/// Error for a claimed context whose checkpoint belongs to no stage of `family`
fn missing_checkpoint(family: WorkflowFamily, checkpoint: Option<Checkpoint>) -> WorkflowError {
    WorkflowError::invalid_input(format!(
        "no {} checkpoint to resume from (found {:?})",
        family, checkpoint
    ))
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::domain::workflow::step::mock::CallLog;
    use crate::domain::workflow::{ClarificationKind, TableSqlStage, WorkflowStatus};

    #[tokio::test]
    async fn test_settle_converts_error_into_failure() {
        let h = harness(StepRegistry::new());
        let mut ctx = context(WorkflowFamily::TableSql);
        h.core.admit(&ctx, WorkflowFamily::TableSql).await.unwrap();

        h.core
            .settle(&mut ctx, Err(WorkflowError::Collaborator("llm down".to_string())))
            .await
            .unwrap();

        assert_eq!(ctx.status, WorkflowStatus::Failed);
        assert!(ctx
            .final_answer
            .as_deref()
            .unwrap()
            .starts_with(messages::ERROR_PREFIX));
        let stored = h.store.get(&ctx.execution_id).await.unwrap();
        assert_eq!(stored.status, WorkflowStatus::Failed);
    }

    #[tokio::test]
    async fn test_settle_rejects_open_context() {
        let h = harness(StepRegistry::new());
        let mut ctx = context(WorkflowFamily::TableSql);
        h.core.admit(&ctx, WorkflowFamily::TableSql).await.unwrap();

        h.core.settle(&mut ctx, Ok(())).await.unwrap();

        assert_eq!(ctx.status, WorkflowStatus::Failed);
    }

    #[tokio::test]
    async fn test_settle_after_delete_keeps_instance_gone() {
        let h = harness(StepRegistry::new());
        let mut ctx = context(WorkflowFamily::TableSql);
        h.core.admit(&ctx, WorkflowFamily::TableSql).await.unwrap();
        h.store.remove(&ctx.execution_id).await.unwrap();

        ctx.complete("answer");
        let err = h.core.settle(&mut ctx, Ok(())).await.unwrap_err();

        assert!(err.is_not_found());
        assert!(h.store.get(&ctx.execution_id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_admit_checks_family() {
        let h = harness(StepRegistry::new());
        let ctx = context(WorkflowFamily::ToolUse);

        let err = h.core.admit(&ctx, WorkflowFamily::TableSql).await.unwrap_err();
        assert!(matches!(err, WorkflowError::WrongFamily { .. }));
        assert_eq!(h.store.len().await, 0);
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let h = harness(StepRegistry::new());
        let mut ctx = context(WorkflowFamily::TableSql);
        ctx.request_clarification(ClarificationKind::DateRange, "which period?");
        ctx.suspend(Checkpoint::TableSql(TableSqlStage::GenerateQuery));
        h.core.admit(&ctx, WorkflowFamily::TableSql).await.unwrap();

        let input = ClarificationInput::date_range("2024-01-01", "2024-01-31");
        let claimed = h
            .core
            .claim(&ctx.execution_id, WorkflowFamily::TableSql, Some(input.clone()))
            .await
            .unwrap();
        assert_eq!(claimed.status, WorkflowStatus::Running);

        let err = h
            .core
            .claim(&ctx.execution_id, WorkflowFamily::TableSql, Some(input))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::NotAwaitingClarification(_)));
    }

    #[tokio::test]
    async fn test_claim_with_bad_input_leaves_context_suspended() {
        let h = harness(StepRegistry::new());
        let mut ctx = context(WorkflowFamily::TableSql);
        ctx.request_clarification(ClarificationKind::DateRange, "which period?");
        ctx.suspend(Checkpoint::TableSql(TableSqlStage::GenerateQuery));
        h.core.admit(&ctx, WorkflowFamily::TableSql).await.unwrap();

        let err = h
            .core
            .claim(
                &ctx.execution_id,
                WorkflowFamily::TableSql,
                Some(ClarificationInput::text("no dates")),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, WorkflowError::InvalidInput(_)));
        let stored = h.store.get(&ctx.execution_id).await.unwrap();
        assert!(stored.is_suspended());
        assert!(stored.flags.awaiting_clarification);
    }

    #[test]
    fn test_fill_registers_missing_kinds() {
        let log = CallLog::new();
        let registry = fill(
            StepRegistry::new().with_step(respond(&log)),
            &[StepKind::Respond, StepKind::SelectTable],
            &log,
        );
        assert_eq!(registry.len(), 2);
    }
}

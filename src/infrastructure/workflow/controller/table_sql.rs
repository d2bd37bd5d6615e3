use async_trait::async_trait;
use tracing::warn;

use super::{missing_checkpoint, suspend_if_awaiting, Controller, PipelineCore};
use crate::domain::workflow::{
    Checkpoint, ClarificationInput, ExecutionContext, ExecutionId, StepKind, TableSqlStage,
    WorkflowError, WorkflowFamily,
};
use crate::infrastructure::workflow::messages;
use crate::infrastructure::workflow::safeguard::{SafeguardLoop, SafeguardOutcome};

const REQUIRED_STEPS: &[StepKind] = &[
    StepKind::SelectTable,
    StepKind::ExtractDates,
    StepKind::GenerateQuery,
    StepKind::ExecuteQuery,
    StepKind::CorrectQuery,
    StepKind::Respond,
    StepKind::RespondNoData,
];

/// Table selection, date extraction, SQL generation, the safeguard loop and
/// the answer. Suspends after date extraction when the period is unknown.
#[derive(Debug, Clone)]
pub struct TableSqlController {
    core: PipelineCore,
    safeguard: SafeguardLoop,
}

impl TableSqlController {
    pub fn new(core: PipelineCore, max_query_attempts: u32) -> Result<Self, WorkflowError> {
        core.require(REQUIRED_STEPS)?;
        Ok(Self {
            core,
            safeguard: SafeguardLoop::new(max_query_attempts),
        })
    }

    async fn advance(
        &self,
        ctx: &mut ExecutionContext,
        mut stage: TableSqlStage,
    ) -> Result<(), WorkflowError> {
        loop {
            stage = match stage {
                TableSqlStage::SelectTable => {
                    self.core.run(StepKind::SelectTable, ctx).await?;
                    if ctx.progress.selected_target.is_none() {
                        ctx.fail(messages::NO_TABLE);
                        return Ok(());
                    }
                    TableSqlStage::ExtractDates
                }
                TableSqlStage::ExtractDates => {
                    self.core.run(StepKind::ExtractDates, ctx).await?;
                    if suspend_if_awaiting(ctx, Checkpoint::TableSql(TableSqlStage::GenerateQuery)) {
                        return Ok(());
                    }
                    TableSqlStage::GenerateQuery
                }
                TableSqlStage::GenerateQuery => {
                    if ctx.flags.invalid_date || ctx.progress.date_range.is_none() {
                        ctx.fail(messages::INVALID_DATE);
                        return Ok(());
                    }
                    self.core.run(StepKind::GenerateQuery, ctx).await?;
                    if ctx.progress.query.as_deref().is_none_or(|q| q.trim().is_empty()) {
                        ctx.fail(messages::EMPTY_QUERY);
                        return Ok(());
                    }
                    TableSqlStage::ExecuteQuery
                }
                TableSqlStage::ExecuteQuery => {
                    let outcome = self
                        .safeguard
                        .run(self.core.runner(), self.core.registry(), ctx)
                        .await?;
                    if outcome != SafeguardOutcome::Succeeded {
                        warn!(
                            execution_id = %ctx.execution_id,
                            outcome = ?outcome,
                            attempts = ctx.retry_count,
                            "Query could not be executed"
                        );
                        ctx.fail(messages::QUERY_FAILED);
                        return Ok(());
                    }
                    TableSqlStage::Respond
                }
                TableSqlStage::Respond => {
                    let kind = if ctx.flags.no_data {
                        StepKind::RespondNoData
                    } else {
                        StepKind::Respond
                    };
                    return self.core.run(kind, ctx).await;
                }
            };
        }
    }
}

#[async_trait]
impl Controller for TableSqlController {
    fn family(&self) -> WorkflowFamily {
        WorkflowFamily::TableSql
    }

    async fn execute(&self, mut ctx: ExecutionContext) -> Result<ExecutionContext, WorkflowError> {
        self.core.admit(&ctx, self.family()).await?;
        let result = self.advance(&mut ctx, TableSqlStage::SelectTable).await;
        self.core.settle(&mut ctx, result).await?;
        Ok(ctx)
    }

    async fn resume(
        &self,
        id: &ExecutionId,
        input: &ClarificationInput,
    ) -> Result<ExecutionContext, WorkflowError> {
        let mut ctx = self.core.claim(id, self.family(), Some(input.clone())).await?;
        let result = match ctx.checkpoint.take() {
            Some(Checkpoint::TableSql(stage)) => self.advance(&mut ctx, stage).await,
            other => Err(missing_checkpoint(self.family(), other)),
        };
        self.core.settle(&mut ctx, result).await?;
        Ok(ctx)
    }
}

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{missing_checkpoint, suspend_if_awaiting, Controller, PipelineCore};
use crate::domain::workflow::{
    ApiCatalog, Checkpoint, ClarificationInput, ExecutionContext, ExecutionId, ParamResolution,
    StepKind, ToolUseStage, WorkflowError, WorkflowFamily,
};
use crate::infrastructure::workflow::messages;

const REQUIRED_STEPS: &[StepKind] = &[
    StepKind::SelectApi,
    StepKind::ExtractParams,
    StepKind::ResolvePeriod,
    StepKind::InvokeApi,
    StepKind::Respond,
    StepKind::RespondNoData,
];

/// API selection, parameter extraction, period resolution for period-aware
/// APIs, invocation and the answer
#[derive(Debug, Clone)]
pub struct ToolUseController {
    core: PipelineCore,
    apis: Arc<ApiCatalog>,
}

impl ToolUseController {
    pub fn new(core: PipelineCore, apis: Arc<ApiCatalog>) -> Result<Self, WorkflowError> {
        core.require(REQUIRED_STEPS)?;
        Ok(Self { core, apis })
    }

    fn resolution(&self, ctx: &ExecutionContext) -> ParamResolution {
        ctx.progress
            .selected_target
            .as_deref()
            .and_then(|name| self.apis.get(name))
            .map(|api| api.resolution)
            .unwrap_or_default()
    }

    async fn advance(
        &self,
        ctx: &mut ExecutionContext,
        mut stage: ToolUseStage,
    ) -> Result<(), WorkflowError> {
        loop {
            stage = match stage {
                ToolUseStage::SelectApi => {
                    self.core.run(StepKind::SelectApi, ctx).await?;
                    if ctx.progress.selected_target.is_none() {
                        ctx.fail(messages::NO_API);
                        return Ok(());
                    }
                    ToolUseStage::ExtractParams
                }
                ToolUseStage::ExtractParams => {
                    self.core.run(StepKind::ExtractParams, ctx).await?;
                    if suspend_if_awaiting(ctx, Checkpoint::ToolUse(ToolUseStage::ResolvePeriod)) {
                        return Ok(());
                    }
                    ToolUseStage::ResolvePeriod
                }
                ToolUseStage::ResolvePeriod => {
                    if ctx.flags.invalid_date || ctx.progress.date_range.is_none() {
                        ctx.fail(messages::INVALID_DATE);
                        return Ok(());
                    }
                    match self.resolution(ctx) {
                        ParamResolution::Period => {
                            self.core.run(StepKind::ResolvePeriod, ctx).await?
                        }
                        ParamResolution::Direct => {
                            debug!(execution_id = %ctx.execution_id, "API takes parameters as extracted")
                        }
                    }
                    ToolUseStage::InvokeApi
                }
                ToolUseStage::InvokeApi => {
                    self.core.run(StepKind::InvokeApi, ctx).await?;
                    ToolUseStage::Respond
                }
                ToolUseStage::Respond => {
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
impl Controller for ToolUseController {
    fn family(&self) -> WorkflowFamily {
        WorkflowFamily::ToolUse
    }

    async fn execute(&self, mut ctx: ExecutionContext) -> Result<ExecutionContext, WorkflowError> {
        self.core.admit(&ctx, self.family()).await?;
        let result = self.advance(&mut ctx, ToolUseStage::SelectApi).await;
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
            Some(Checkpoint::ToolUse(stage)) => self.advance(&mut ctx, stage).await,
            other => Err(missing_checkpoint(self.family(), other)),
        };
        self.core.settle(&mut ctx, result).await?;
        Ok(ctx)
    }
}

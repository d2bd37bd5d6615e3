use async_trait::async_trait;

use super::{Controller, PipelineCore};
use crate::domain::workflow::{
    ClarificationInput, ExecutionContext, ExecutionId, StateStore, StepKind, WorkflowError,
    WorkflowFamily,
};

/// One step: a polite reply to a request unrelated to the user's finances
#[derive(Debug, Clone)]
pub struct SmallTalkController {
    core: PipelineCore,
}

impl SmallTalkController {
    pub fn new(core: PipelineCore) -> Result<Self, WorkflowError> {
        core.require(&[StepKind::SmallTalk])?;
        Ok(Self { core })
    }
}

#[async_trait]
impl Controller for SmallTalkController {
    fn family(&self) -> WorkflowFamily {
        WorkflowFamily::SmallTalk
    }

    async fn execute(&self, mut ctx: ExecutionContext) -> Result<ExecutionContext, WorkflowError> {
        self.core.admit(&ctx, self.family()).await?;
        let result = self.core.run(StepKind::SmallTalk, &mut ctx).await;
        self.core.settle(&mut ctx, result).await?;
        Ok(ctx)
    }

    /// Small talk never suspends, so there is nothing to resume
    async fn resume(
        &self,
        id: &ExecutionId,
        _input: &ClarificationInput,
    ) -> Result<ExecutionContext, WorkflowError> {
        let ctx = self.core.store().get(id).await?;
        ctx.ensure_family(self.family())?;
        Err(WorkflowError::not_awaiting_clarification(id.as_str()))
    }
}

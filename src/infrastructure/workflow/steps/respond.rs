//! Terminal answer steps shared by every pipeline

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use super::StepDeps;
use crate::domain::llm::LlmClient;
use crate::domain::workflow::{ExecutionContext, Step, StepKind, WorkflowError};
use crate::infrastructure::workflow::messages::NO_DATA_FALLBACK;
use crate::infrastructure::workflow::prompts;

/// Answers from the query results and completes the context
#[derive(Debug)]
pub struct RespondStep {
    llm: Arc<dyn LlmClient>,
}

impl RespondStep {
    pub fn new(deps: &StepDeps) -> Self {
        Self {
            llm: deps.llm.clone(),
        }
    }
}

#[async_trait]
impl Step for RespondStep {
    fn kind(&self) -> StepKind {
        StepKind::Respond
    }

    async fn run(&self, ctx: &mut ExecutionContext) -> Result<(), WorkflowError> {
        let prompt = prompts::respond(
            &ctx.request.question,
            &ctx.progress.rows,
            ctx.progress.has_next,
        );
        let answer = self.llm.call(&prompt, self.name()).await?;

        ctx.complete(answer);
        Ok(())
    }
}

/// Explains that nothing matched and completes the context as no-data
#[derive(Debug)]
pub struct RespondNoDataStep {
    llm: Arc<dyn LlmClient>,
}

impl RespondNoDataStep {
    pub fn new(deps: &StepDeps) -> Self {
        Self {
            llm: deps.llm.clone(),
        }
    }
}

#[async_trait]
impl Step for RespondNoDataStep {
    fn kind(&self) -> StepKind {
        StepKind::RespondNoData
    }

    async fn run(&self, ctx: &mut ExecutionContext) -> Result<(), WorkflowError> {
        let prompt = prompts::respond_no_data(&ctx.request.question, ctx.progress.date_range.as_ref());
        let answer = match self.llm.call(&prompt, self.name()).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!(execution_id = %ctx.execution_id, error = %e, "No-data reply failed; using fallback");
                NO_DATA_FALLBACK.to_string()
            }
        };

        ctx.complete_no_data(answer);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::llm::ScriptedLlmClient;
    use crate::domain::query::ScriptedQueryExecutor;
    use crate::domain::workflow::{FamilyPayload, WorkflowStatus};
    use crate::infrastructure::workflow::steps::fixtures;

    #[tokio::test]
    async fn test_respond_completes_with_answer() {
        let llm = ScriptedLlmClient::new().with_reply("respond", "You spent 1,200 in May.");
        let deps = fixtures::deps(llm, ScriptedQueryExecutor::new());
        let mut ctx = fixtures::context(FamilyPayload::TableSql);
        ctx.record_rows(fixtures::rows(1));

        RespondStep::new(&deps).run(&mut ctx).await.unwrap();

        assert_eq!(ctx.status, WorkflowStatus::Completed);
        assert_eq!(ctx.final_answer.as_deref(), Some("You spent 1,200 in May."));
    }

    #[tokio::test]
    async fn test_respond_error_leaves_context_open() {
        let llm = ScriptedLlmClient::new().with_error("respond", "timeout");
        let deps = fixtures::deps(llm, ScriptedQueryExecutor::new());
        let mut ctx = fixtures::context(FamilyPayload::TableSql);

        assert!(RespondStep::new(&deps).run(&mut ctx).await.is_err());
        assert!(ctx.final_answer.is_none());
    }

    #[tokio::test]
    async fn test_no_data_falls_back() {
        let llm = ScriptedLlmClient::new().with_error("respond_no_data", "timeout");
        let deps = fixtures::deps(llm, ScriptedQueryExecutor::new());
        let mut ctx = fixtures::context(FamilyPayload::TableSql);

        RespondNoDataStep::new(&deps).run(&mut ctx).await.unwrap();

        assert_eq!(ctx.status, WorkflowStatus::NoData);
        assert_eq!(ctx.final_answer.as_deref(), Some(NO_DATA_FALLBACK));
    }
}

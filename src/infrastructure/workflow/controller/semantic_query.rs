use async_trait::async_trait;

use super::{missing_checkpoint, suspend_if_awaiting, Controller, PipelineCore};
use crate::domain::workflow::{
    Checkpoint, ClarificationInput, ExecutionContext, ExecutionId, SemanticStage, StepKind,
    WorkflowError, WorkflowFamily,
};
use crate::infrastructure::workflow::messages;

const REQUIRED_STEPS: &[StepKind] = &[
    StepKind::CheckDates,
    StepKind::ExtractMetrics,
    StepKind::ExtractFilter,
    StepKind::Manipulate,
    StepKind::DslToSql,
];

/// Builds a query from a structured description of the question. Completes
/// with the generated query as its answer; executing it is up to the caller.
#[derive(Debug, Clone)]
pub struct SemanticQueryController {
    core: PipelineCore,
}

impl SemanticQueryController {
    pub fn new(core: PipelineCore) -> Result<Self, WorkflowError> {
        core.require(REQUIRED_STEPS)?;
        Ok(Self { core })
    }

    async fn advance(
        &self,
        ctx: &mut ExecutionContext,
        mut stage: SemanticStage,
    ) -> Result<(), WorkflowError> {
        loop {
            stage = match stage {
                SemanticStage::CheckDates => {
                    self.core.run(StepKind::CheckDates, ctx).await?;
                    if suspend_if_awaiting(
                        ctx,
                        Checkpoint::SemanticQuery(SemanticStage::ExtractMetrics),
                    ) {
                        return Ok(());
                    }
                    SemanticStage::ExtractMetrics
                }
                SemanticStage::ExtractMetrics => {
                    if ctx.flags.invalid_date || ctx.progress.date_range.is_none() {
                        ctx.fail(messages::INVALID_DATE);
                        return Ok(());
                    }
                    self.core.run(StepKind::ExtractMetrics, ctx).await?;
                    if ctx.semantic()?.dsl.is_none() {
                        ctx.fail(messages::NO_METRICS);
                        return Ok(());
                    }
                    SemanticStage::ExtractFilter
                }
                SemanticStage::ExtractFilter => {
                    self.core.run(StepKind::ExtractFilter, ctx).await?;
                    SemanticStage::Manipulate
                }
                SemanticStage::Manipulate => {
                    self.core.run(StepKind::Manipulate, ctx).await?;
                    SemanticStage::DslToSql
                }
                SemanticStage::DslToSql => {
                    self.core.run(StepKind::DslToSql, ctx).await?;
                    match ctx.progress.query.clone().filter(|q| !q.trim().is_empty()) {
                        Some(query) => ctx.complete(query),
                        None => ctx.fail(messages::EMPTY_QUERY),
                    };
                    return Ok(());
                }
            };
        }
    }
}

#[async_trait]
impl Controller for SemanticQueryController {
    fn family(&self) -> WorkflowFamily {
        WorkflowFamily::SemanticQuery
    }

    async fn execute(&self, mut ctx: ExecutionContext) -> Result<ExecutionContext, WorkflowError> {
        self.core.admit(&ctx, self.family()).await?;
        let result = self.advance(&mut ctx, SemanticStage::CheckDates).await;
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
            Some(Checkpoint::SemanticQuery(stage)) => self.advance(&mut ctx, stage).await,
            other => Err(missing_checkpoint(self.family(), other)),
        };
        self.core.settle(&mut ctx, result).await?;
        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use std::sync::Arc;

    use crate::domain::workflow::step::mock::CallLog;
    use crate::domain::workflow::{
        ClarificationKind, DateRange, SemanticDsl, Step, StepRegistry, WorkflowStatus,
    };

    fn dates(log: &CallLog) -> Arc<dyn Step> {
        step(StepKind::CheckDates, log, |ctx| {
            ctx.progress.date_range = Some(DateRange::parse("2024-05-01", "2024-05-31").unwrap());
            Ok(())
        })
    }

    fn metrics(log: &CallLog) -> Arc<dyn Step> {
        step(StepKind::ExtractMetrics, log, |ctx| {
            ctx.semantic_mut()?.dsl = Some(SemanticDsl {
                table: "trsc".to_string(),
                metrics: vec!["SUM(out_amt)".to_string()],
                ..Default::default()
            });
            Ok(())
        })
    }

    fn to_sql(log: &CallLog) -> Arc<dyn Step> {
        step(StepKind::DslToSql, log, |ctx| {
            ctx.progress.query = Some("SELECT SUM(out_amt) FROM trsc".to_string());
            Ok(())
        })
    }

    fn registry(log: &CallLog) -> StepRegistry {
        fill(
            StepRegistry::new()
                .with_step(dates(log))
                .with_step(metrics(log))
                .with_step(to_sql(log)),
            REQUIRED_STEPS,
            log,
        )
    }

    #[tokio::test]
    async fn test_completes_with_generated_query() {
        let log = CallLog::new();
        let h = harness(registry(&log));
        let controller = SemanticQueryController::new(h.core.clone()).unwrap();

        let ctx = controller.execute(context(WorkflowFamily::SemanticQuery)).await.unwrap();

        assert_eq!(ctx.status, WorkflowStatus::Completed);
        assert_eq!(ctx.final_answer.as_deref(), Some("SELECT SUM(out_amt) FROM trsc"));
        assert_eq!(log.calls(), REQUIRED_STEPS.to_vec());
    }

    #[tokio::test]
    async fn test_no_metrics_fails() {
        let log = CallLog::new();
        let registry = registry(&log).with_step(step(StepKind::ExtractMetrics, &log, |_| Ok(())));
        let h = harness(registry);
        let controller = SemanticQueryController::new(h.core.clone()).unwrap();

        let ctx = controller.execute(context(WorkflowFamily::SemanticQuery)).await.unwrap();

        assert_eq!(ctx.final_answer.as_deref(), Some(messages::NO_METRICS));
        assert_eq!(log.count(StepKind::ExtractFilter), 0);
    }

    #[tokio::test]
    async fn test_suspends_at_date_check_and_resumes() {
        let log = CallLog::new();
        let registry = registry(&log).with_step(step(StepKind::CheckDates, &log, |ctx| {
            ctx.request_clarification(ClarificationKind::DateRange, "Which period?");
            Ok(())
        }));
        let h = harness(registry);
        let controller = SemanticQueryController::new(h.core.clone()).unwrap();

        let ctx = controller.execute(context(WorkflowFamily::SemanticQuery)).await.unwrap();
        assert_eq!(ctx.status, WorkflowStatus::Suspended);
        assert_eq!(
            ctx.checkpoint,
            Some(Checkpoint::SemanticQuery(SemanticStage::ExtractMetrics))
        );

        let resumed = controller
            .resume(
                &ctx.execution_id,
                &ClarificationInput::date_range("2024-05-01", "2024-05-31"),
            )
            .await
            .unwrap();

        assert_eq!(resumed.status, WorkflowStatus::Completed);
        assert_eq!(log.count(StepKind::CheckDates), 1);
        assert_eq!(log.count(StepKind::DslToSql), 1);
    }
}

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use super::{missing_checkpoint, Controller, PipelineCore, SemanticQueryController};
use crate::domain::workflow::{
    Checkpoint, ClarificationInput, ClarificationKind, ExecutionContext, ExecutionId,
    RequestClass, StateStore, StepKind, SubExecution, SubExecutionStatus, SupervisorStage,
    WorkflowError, WorkflowFamily, WorkflowStatus,
};
use crate::infrastructure::workflow::query_runner::QueryRunner;

const REQUIRED_STEPS: &[StepKind] = &[
    StepKind::ClassifyRequest,
    StepKind::SplitQuestion,
    StepKind::PostProcess,
    StepKind::SmallTalk,
    StepKind::Respond,
    StepKind::RespondNoData,
];

/// Routes a request: small talk is answered directly; a data question is
/// split into sub-questions, each run as a semantic-query sub-execution in
/// ascending `execution_no`, and the results are aggregated into one answer.
///
/// A sub-execution waiting for clarification suspends the supervisor and
/// stops the fan-out. A failed sub-execution fails the supervisor with its
/// answer. Query failures only mark the record as errored.
#[derive(Debug, Clone)]
pub struct SupervisorController {
    core: PipelineCore,
    semantic: Arc<SemanticQueryController>,
    queries: QueryRunner,
}

impl SupervisorController {
    pub fn new(
        core: PipelineCore,
        semantic: Arc<SemanticQueryController>,
        queries: QueryRunner,
    ) -> Result<Self, WorkflowError> {
        core.require(REQUIRED_STEPS)?;
        Ok(Self {
            core,
            semantic,
            queries,
        })
    }

    async fn advance(
        &self,
        ctx: &mut ExecutionContext,
        mut stage: SupervisorStage,
    ) -> Result<(), WorkflowError> {
        loop {
            stage = match stage {
                SupervisorStage::Classify => {
                    self.core.run(StepKind::ClassifyRequest, ctx).await?;
                    if ctx.supervisor()?.class != Some(RequestClass::DataQuestion) {
                        return self.core.run(StepKind::SmallTalk, ctx).await;
                    }
                    SupervisorStage::Split
                }
                SupervisorStage::Split => {
                    self.core.run(StepKind::SplitQuestion, ctx).await?;
                    SupervisorStage::FanOut
                }
                SupervisorStage::FanOut => {
                    if !self.fan_out(ctx).await? {
                        return Ok(());
                    }
                    SupervisorStage::Aggregate
                }
                SupervisorStage::Aggregate => {
                    if SubExecution::has_any_data(&ctx.supervisor()?.executions) {
                        self.core.run(StepKind::PostProcess, ctx).await?;
                        return self.core.run(StepKind::Respond, ctx).await;
                    }
                    return self.core.run(StepKind::RespondNoData, ctx).await;
                }
            };
        }
    }

    /// Run pending sub-executions in order. Returns false when the
    /// supervisor was suspended or failed on the way.
    async fn fan_out(&self, ctx: &mut ExecutionContext) -> Result<bool, WorkflowError> {
        loop {
            let executions = &ctx.supervisor()?.executions;
            let Some(index) = next_pending(executions) else {
                return Ok(true);
            };
            let (execution_no, question) =
                (executions[index].execution_no, executions[index].question.clone());
            info!(
                execution_id = %ctx.execution_id,
                execution_no,
                question = %question,
                "Starting sub-execution"
            );

            let sub = ExecutionContext::for_sub_execution(ctx, question);
            let sub = self.semantic.execute(sub).await?;

            if !self.absorb(ctx, index, sub).await? {
                return Ok(false);
            }
        }
    }

    /// Fold a settled sub-execution into its record. Returns false when the
    /// fan-out must stop.
    async fn absorb(
        &self,
        ctx: &mut ExecutionContext,
        index: usize,
        sub: ExecutionContext,
    ) -> Result<bool, WorkflowError> {
        match sub.status {
            WorkflowStatus::Suspended => {
                let record = &mut ctx.supervisor_mut()?.executions[index];
                record.context_id = Some(sub.execution_id.clone());
                record.status = SubExecutionStatus::Waiting;

                ctx.request_clarification(
                    sub.flags.clarification.unwrap_or(ClarificationKind::Question),
                    sub.clarification_message.clone().unwrap_or_default(),
                );
                ctx.suspend(Checkpoint::Supervisor(SupervisorStage::FanOut));
                info!(
                    execution_id = %ctx.execution_id,
                    sub_execution_id = %sub.execution_id,
                    "Sub-execution awaiting clarification"
                );
                Ok(false)
            }
            WorkflowStatus::Failed => {
                let answer = sub.final_answer.clone().unwrap_or_default();
                let record = &mut ctx.supervisor_mut()?.executions[index];
                record.context_id = Some(sub.execution_id.clone());
                record.mark_error(answer.clone());

                warn!(
                    execution_id = %ctx.execution_id,
                    sub_execution_id = %sub.execution_id,
                    "Sub-execution failed; aborting remaining sub-questions"
                );
                ctx.fail(answer);
                Ok(false)
            }
            WorkflowStatus::Completed | WorkflowStatus::NoData => {
                let query = sub.progress.query.clone();
                let outcome = match query {
                    Some(ref query) => Some(self.queries.run_with_cross_database_fix(query).await),
                    None => None,
                };

                let record = &mut ctx.supervisor_mut()?.executions[index];
                record.absorb(&sub);
                match outcome {
                    Some(Ok(page)) => record.mark_completed(page.rows, page.has_next),
                    Some(Err(e)) => {
                        warn!(
                            execution_no = record.execution_no,
                            error = %e,
                            "Sub-execution query failed"
                        );
                        record.mark_error(e.to_string());
                    }
                    None => record.mark_error("sub-execution produced no query"),
                }
                Ok(true)
            }
            WorkflowStatus::Running => Err(WorkflowError::step_execution(
                "fan_out",
                format!("sub-execution {} ended without an outcome", sub.execution_id),
            )),
        }
    }
}

fn next_pending(executions: &[SubExecution]) -> Option<usize> {
    executions
        .iter()
        .enumerate()
        .filter(|(_, e)| e.status == SubExecutionStatus::Pending)
        .min_by_key(|(_, e)| e.execution_no)
        .map(|(index, _)| index)
}

fn waiting_record(executions: &[SubExecution]) -> Option<(usize, ExecutionId)> {
    executions.iter().enumerate().find_map(|(index, e)| {
        match (e.status, e.context_id.as_ref()) {
            (SubExecutionStatus::Waiting, Some(id)) => Some((index, id.clone())),
            _ => None,
        }
    })
}

#[async_trait]
impl Controller for SupervisorController {
    fn family(&self) -> WorkflowFamily {
        WorkflowFamily::Supervisor
    }

    async fn execute(&self, mut ctx: ExecutionContext) -> Result<ExecutionContext, WorkflowError> {
        self.core.admit(&ctx, self.family()).await?;
        let result = self.advance(&mut ctx, SupervisorStage::Classify).await;
        self.core.settle(&mut ctx, result).await?;
        Ok(ctx)
    }

    /// The input goes to the waiting sub-execution. Once that settles, the
    /// supervisor is claimed and the fan-out continues.
    async fn resume(
        &self,
        id: &ExecutionId,
        input: &ClarificationInput,
    ) -> Result<ExecutionContext, WorkflowError> {
        let parent = self.core.store().get(id).await?;
        parent.ensure_family(self.family())?;
        if !parent.flags.awaiting_clarification {
            return Err(WorkflowError::not_awaiting_clarification(id.as_str()));
        }

        let (_, sub_id) = waiting_record(&parent.supervisor()?.executions).ok_or_else(|| {
            WorkflowError::invalid_input(format!("no waiting sub-execution under {}", id))
        })?;
        let sub = self.semantic.resume(&sub_id, input).await?;

        let mut ctx = self.core.claim(id, self.family(), None).await?;
        let checkpoint = ctx.checkpoint.take();
        let waiting = waiting_record(&ctx.supervisor()?.executions);
        let result = match (checkpoint, waiting) {
            (Some(Checkpoint::Supervisor(SupervisorStage::FanOut)), Some((index, _))) => {
                match self.absorb(&mut ctx, index, sub).await {
                    Ok(true) => self.advance(&mut ctx, SupervisorStage::FanOut).await,
                    Ok(false) => Ok(()),
                    Err(e) => Err(e),
                }
            }
            (checkpoint, _) => Err(missing_checkpoint(self.family(), checkpoint)),
        };
        self.core.settle(&mut ctx, result).await?;
        Ok(ctx)
    }
}

//! Supervisor steps: classify, split, merge, and the small-talk reply

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use super::StepDeps;
use crate::domain::llm::LlmClient;
use crate::domain::workflow::{
    DateRange, ExecutionContext, RequestClass, Step, StepKind, SubExecution, SubExecutionStatus,
    WorkflowError,
};
use crate::infrastructure::workflow::messages::SMALL_TALK_FALLBACK;
use crate::infrastructure::workflow::{parse, prompts};

#[derive(Debug)]
pub struct ClassifyRequestStep {
    llm: Arc<dyn LlmClient>,
}

impl ClassifyRequestStep {
    pub fn new(deps: &StepDeps) -> Self {
        Self {
            llm: deps.llm.clone(),
        }
    }
}

#[async_trait]
impl Step for ClassifyRequestStep {
    fn kind(&self) -> StepKind {
        StepKind::ClassifyRequest
    }

    async fn run(&self, ctx: &mut ExecutionContext) -> Result<(), WorkflowError> {
        let prompt = prompts::classify_request(&ctx.request.question);
        let reply = self.llm.call(&prompt, self.name()).await?;

        let class = if parse::is_yes(&reply) {
            RequestClass::DataQuestion
        } else {
            RequestClass::SmallTalk
        };

        info!(execution_id = %ctx.execution_id, class = ?class, "Request classified");
        ctx.supervisor_mut()?.class = Some(class);
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SplitItem {
    Numbered { execution_no: u32, question: String },
    Plain(String),
}

/// Ordered sub-questions from a split reply; the whole question when the
/// reply yields none
fn sub_executions(reply: &str, question: &str) -> Vec<SubExecution> {
    let mut items: Vec<(u32, String)> = parse::parse_json::<Vec<SplitItem>>(reply)
        .unwrap_or_default()
        .into_iter()
        .zip(1u32..)
        .map(|(item, position)| match item {
            SplitItem::Numbered { execution_no, question } => (execution_no, question),
            SplitItem::Plain(question) => (position, question),
        })
        .filter(|(_, q)| !q.trim().is_empty())
        .collect();

    if items.is_empty() {
        return vec![SubExecution::new(1, question)];
    }

    items.sort_by_key(|(no, _)| *no);
    items
        .into_iter()
        .zip(1u32..)
        .map(|((_, q), no)| SubExecution::new(no, q.trim()))
        .collect()
}

#[derive(Debug)]
pub struct SplitQuestionStep {
    llm: Arc<dyn LlmClient>,
}

impl SplitQuestionStep {
    pub fn new(deps: &StepDeps) -> Self {
        Self {
            llm: deps.llm.clone(),
        }
    }
}

#[async_trait]
impl Step for SplitQuestionStep {
    fn kind(&self) -> StepKind {
        StepKind::SplitQuestion
    }

    async fn run(&self, ctx: &mut ExecutionContext) -> Result<(), WorkflowError> {
        let prompt = prompts::split_question(&ctx.request.question);
        let reply = self.llm.call(&prompt, self.name()).await?;

        let executions = sub_executions(&reply, &ctx.request.question);
        info!(execution_id = %ctx.execution_id, count = executions.len(), "Question split");
        ctx.supervisor_mut()?.executions = executions;
        Ok(())
    }
}

/// Merges the rows and queries of completed sub-executions into the
/// supervisor's own progress
#[derive(Debug)]
pub struct PostProcessStep;

#[async_trait]
impl Step for PostProcessStep {
    fn kind(&self) -> StepKind {
        StepKind::PostProcess
    }

    async fn run(&self, ctx: &mut ExecutionContext) -> Result<(), WorkflowError> {
        let completed: Vec<SubExecution> = ctx
            .supervisor()?
            .executions
            .iter()
            .filter(|e| e.status == SubExecutionStatus::Completed)
            .cloned()
            .collect();

        let queries: Vec<String> = completed.iter().filter_map(|e| e.query.clone()).collect();
        let range = completed
            .iter()
            .filter_map(|e| e.date_range)
            .reduce(|a, b| DateRange {
                start: a.start.min(b.start),
                end: a.end.max(b.end),
            });

        ctx.progress.query = (!queries.is_empty()).then(|| queries.join(";\n"));
        ctx.progress.has_next = completed.iter().any(|e| e.has_next);
        if range.is_some() {
            ctx.progress.date_range = range;
        }
        ctx.record_rows(completed.into_iter().flat_map(|e| e.rows).collect());
        Ok(())
    }
}

/// Polite redirect for requests unrelated to the user's finances. Completes
/// the context itself.
#[derive(Debug)]
pub struct SmallTalkStep {
    llm: Arc<dyn LlmClient>,
}

impl SmallTalkStep {
    pub fn new(deps: &StepDeps) -> Self {
        Self {
            llm: deps.llm.clone(),
        }
    }
}

#[async_trait]
impl Step for SmallTalkStep {
    fn kind(&self) -> StepKind {
        StepKind::SmallTalk
    }

    async fn run(&self, ctx: &mut ExecutionContext) -> Result<(), WorkflowError> {
        let prompt = prompts::small_talk(&ctx.request.question);
        let answer = match self.llm.call(&prompt, self.name()).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!(execution_id = %ctx.execution_id, error = %e, "Small-talk reply failed; using fallback");
                SMALL_TALK_FALLBACK.to_string()
            }
        };

        ctx.complete(answer);
        Ok(())
    }
}

use serde::{Deserialize, Serialize};

use super::context::{ExecutionContext, ExecutionId, Row, WorkflowFamily, WorkflowStatus};
use super::hil::ClarificationKind;

/// What a caller gets back from `start` or `resume`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowOutcome {
    pub execution_id: ExecutionId,
    pub family: WorkflowFamily,
    pub status: WorkflowStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clarification: Option<ClarificationKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clarification_message: Option<String>,
    pub retry_count: u32,
}

impl WorkflowOutcome {
    pub fn from_context(ctx: &ExecutionContext) -> Self {
        Self {
            execution_id: ctx.execution_id.clone(),
            family: ctx.family(),
            status: ctx.status,
            answer: ctx.final_answer.clone(),
            clarification: ctx.flags.clarification,
            clarification_message: ctx.clarification_message.clone(),
            retry_count: ctx.retry_count,
        }
    }

    pub fn is_suspended(&self) -> bool {
        self.status == WorkflowStatus::Suspended
    }
}

impl From<&ExecutionContext> for WorkflowOutcome {
    fn from(ctx: &ExecutionContext) -> Self {
        Self::from_context(ctx)
    }
}

/// A further page of a finished instance's results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultPage {
    pub execution_id: ExecutionId,
    /// Zero-based page index
    pub page: usize,
    pub rows: Vec<Row>,
    pub has_next: bool,
}

impl ResultPage {
    pub fn from_context(ctx: &ExecutionContext) -> Self {
        Self {
            execution_id: ctx.execution_id.clone(),
            page: ctx.progress.page,
            rows: ctx.progress.rows.clone(),
            has_next: ctx.progress.has_next,
        }
    }
}

//! Supervisor-owned records of decomposed sub-questions

use serde::{Deserialize, Serialize};

use super::context::{DateRange, ExecutionContext, ExecutionId, Row};

/// Processing state of one sub-execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubExecutionStatus {
    #[default]
    Pending,
    Completed,
    Error,
    Waiting,
}

/// One decomposed sub-question and what the supervisor learned running it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubExecution {
    /// Processing order, ascending
    pub execution_no: u32,
    pub question: String,
    pub context_id: Option<ExecutionId>,
    pub status: SubExecutionStatus,
    pub query: Option<String>,
    pub date_range: Option<DateRange>,
    pub error: Option<String>,
    #[serde(default)]
    pub rows: Vec<Row>,
    #[serde(default)]
    pub has_next: bool,
    #[serde(default)]
    pub page: usize,
}

impl SubExecution {
    pub fn new(execution_no: u32, question: impl Into<String>) -> Self {
        Self {
            execution_no,
            question: question.into(),
            context_id: None,
            status: SubExecutionStatus::Pending,
            query: None,
            date_range: None,
            error: None,
            rows: Vec::new(),
            has_next: false,
            page: 0,
        }
    }

    /// Copy the query and period produced by a finished sub-context
    pub fn absorb(&mut self, ctx: &ExecutionContext) {
        self.context_id = Some(ctx.execution_id.clone());
        self.query = ctx.progress.query.clone();
        self.date_range = ctx.progress.date_range;
    }

    pub fn mark_completed(&mut self, rows: Vec<Row>, has_next: bool) {
        self.status = SubExecutionStatus::Completed;
        self.rows = rows;
        self.has_next = has_next;
        self.error = None;
    }

    /// Replace the rows with a later page of the same query
    pub fn mark_page(&mut self, page: usize, rows: Vec<Row>, has_next: bool) {
        self.page = page;
        self.rows = rows;
        self.has_next = has_next;
    }

    /// Whether another page can be fetched for this record
    pub fn can_page(&self) -> bool {
        self.status == SubExecutionStatus::Completed && self.has_next && self.query.is_some()
    }

    pub fn mark_error(&mut self, message: impl Into<String>) {
        self.status = SubExecutionStatus::Error;
        self.error = Some(message.into());
    }

    pub fn has_data(&self) -> bool {
        self.status == SubExecutionStatus::Completed && !self.rows.is_empty()
    }

    /// Whether any completed record produced at least one row
    pub fn has_any_data(executions: &[SubExecution]) -> bool {
        executions.iter().any(SubExecution::has_data)
    }
}

//! Step trace bookkeeping

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::DomainError;

#[cfg(test)]
use mockall::automock;

/// State of one step trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceStatus {
    Running,
    Completed,
    Error,
}

/// One recorded step invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceRecord {
    pub trace_id: String,
    pub execution_id: String,
    pub step: String,
    pub status: TraceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<Value>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl TraceRecord {
    pub fn new(
        trace_id: impl Into<String>,
        execution_id: impl Into<String>,
        step: impl Into<String>,
    ) -> Self {
        Self {
            trace_id: trace_id.into(),
            execution_id: execution_id.into(),
            step: step.into(),
            status: TraceStatus::Running,
            error: None,
            snapshot: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }
}

/// Persistence of step traces and context snapshots.
///
/// Callers treat every method as best-effort: failures are logged and
/// never change the workflow outcome.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TraceRecorder: Send + Sync {
    /// Open a trace for `step` of `execution_id`, returning its ID
    async fn create_trace(&self, execution_id: &str, step: &str) -> Result<String, DomainError>;

    async fn complete_trace(&self, trace_id: &str) -> Result<(), DomainError>;

    async fn mark_trace_error(&self, trace_id: &str, message: &str) -> Result<(), DomainError>;

    async fn save_context_snapshot(&self, trace_id: &str, snapshot: Value)
        -> Result<(), DomainError>;

    /// Record the final answer of a root workflow
    async fn complete_workflow(
        &self,
        execution_id: &str,
        final_answer: &str,
    ) -> Result<(), DomainError>;
}

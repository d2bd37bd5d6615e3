use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::info;

use crate::domain::trace::{TraceRecord, TraceRecorder, TraceStatus};
use crate::domain::DomainError;

/// Keeps step traces and workflow answers in memory
#[derive(Debug, Default)]
pub struct InMemoryTraceRecorder {
    traces: Arc<RwLock<HashMap<String, TraceRecord>>>,
    answers: Arc<RwLock<HashMap<String, String>>>,
}

impl InMemoryTraceRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Traces of one execution in start order
    pub async fn traces_for(&self, execution_id: &str) -> Vec<TraceRecord> {
        let traces = self.traces.read().await;
        let mut records: Vec<TraceRecord> = traces
            .values()
            .filter(|t| t.execution_id == execution_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.trace_id.cmp(&b.trace_id)));
        records
    }

    pub async fn get(&self, trace_id: &str) -> Option<TraceRecord> {
        self.traces.read().await.get(trace_id).cloned()
    }

    /// Final answer recorded for a root workflow
    pub async fn final_answer(&self, execution_id: &str) -> Option<String> {
        self.answers.read().await.get(execution_id).cloned()
    }

    async fn modify<F>(&self, trace_id: &str, f: F) -> Result<(), DomainError>
    where
        F: FnOnce(&mut TraceRecord),
    {
        let mut traces = self.traces.write().await;
        let record = traces
            .get_mut(trace_id)
            .ok_or_else(|| DomainError::not_found(format!("Trace '{}' not found", trace_id)))?;
        f(record);
        Ok(())
    }
}

#[async_trait]
impl TraceRecorder for InMemoryTraceRecorder {
    async fn create_trace(&self, execution_id: &str, step: &str) -> Result<String, DomainError> {
        let mut traces = self.traces.write().await;
        // Sequence suffix keeps IDs ordered within one execution
        let trace_id = format!("{}-{:04}-{}", execution_id, traces.len(), step);
        traces.insert(trace_id.clone(), TraceRecord::new(&trace_id, execution_id, step));
        Ok(trace_id)
    }

    async fn complete_trace(&self, trace_id: &str) -> Result<(), DomainError> {
        self.modify(trace_id, |record| {
            record.status = TraceStatus::Completed;
            record.finished_at = Some(Utc::now());
        })
        .await
    }

    async fn mark_trace_error(&self, trace_id: &str, message: &str) -> Result<(), DomainError> {
        let message = message.to_string();
        self.modify(trace_id, |record| {
            record.status = TraceStatus::Error;
            record.error = Some(message);
            record.finished_at = Some(Utc::now());
        })
        .await
    }

    async fn save_context_snapshot(
        &self,
        trace_id: &str,
        snapshot: Value,
    ) -> Result<(), DomainError> {
        self.modify(trace_id, |record| record.snapshot = Some(snapshot))
            .await
    }

    async fn complete_workflow(
        &self,
        execution_id: &str,
        final_answer: &str,
    ) -> Result<(), DomainError> {
        info!(execution_id = %execution_id, "Workflow completed");
        self.answers
            .write()
            .await
            .insert(execution_id.to_string(), final_answer.to_string());
        Ok(())
    }
}

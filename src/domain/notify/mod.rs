//! Step progress notifications for listening callers

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Debug;

/// Phase of a step event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepPhase {
    Start,
    End,
}

/// One progress event published to a channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepEvent {
    pub channel: String,
    pub execution_id: String,
    pub step: String,
    pub phase: StepPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<Value>,
}

/// Fire-and-forget progress notifications.
///
/// Implementations swallow delivery failures; a missing listener never
/// affects the workflow.
#[async_trait]
pub trait Notifier: Send + Sync + Debug {
    async fn notify_step_start(&self, channel: &str, execution_id: &str, step: &str);

    async fn notify_step_end(&self, channel: &str, execution_id: &str, step: &str, summary: Value);
}

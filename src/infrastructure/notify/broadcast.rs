use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::trace;

use crate::domain::notify::{Notifier, StepEvent, StepPhase};

const DEFAULT_CAPACITY: usize = 256;

/// Publishes step events on a broadcast channel.
///
/// Listeners subscribe and filter on [`StepEvent::channel`]. Events sent
/// while nobody is subscribed are dropped.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<StepEvent>,
}

impl BroadcastNotifier {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StepEvent> {
        self.sender.subscribe()
    }

    fn publish(&self, event: StepEvent) {
        if self.sender.send(event).is_err() {
            trace!("No listeners for step event");
        }
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Notifier for BroadcastNotifier {
    async fn notify_step_start(&self, channel: &str, execution_id: &str, step: &str) {
        self.publish(StepEvent {
            channel: channel.to_string(),
            execution_id: execution_id.to_string(),
            step: step.to_string(),
            phase: StepPhase::Start,
            summary: None,
        });
    }

    async fn notify_step_end(&self, channel: &str, execution_id: &str, step: &str, summary: Value) {
        self.publish(StepEvent {
            channel: channel.to_string(),
            execution_id: execution_id.to_string(),
            step: step.to_string(),
            phase: StepPhase::End,
            summary: Some(summary),
        });
    }
}

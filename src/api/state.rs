//! Application state shared by the HTTP handlers

use std::sync::Arc;

use crate::infrastructure::notify::BroadcastNotifier;
use crate::infrastructure::workflow::Orchestrator;

#[derive(Debug, Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    /// Source of step events for channel subscribers
    pub notifier: Arc<BroadcastNotifier>,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>, notifier: Arc<BroadcastNotifier>) -> Self {
        Self {
            orchestrator,
            notifier,
        }
    }
}

//! Step invocation with trace bookkeeping

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, error, warn};

use crate::domain::notify::Notifier;
use crate::domain::trace::TraceRecorder;
use crate::domain::workflow::{
    ExecutionContext, Step, StepKind, StepRegistry, WorkflowError,
};

/// Runs steps for every controller.
///
/// Around each step it opens a trace, notifies the request's channel, and on
/// success closes the trace and saves a context snapshot. On failure the
/// trace is marked errored and the step's own error is returned unchanged.
/// Trace and notification failures are logged and never fail the step.
pub struct StepRunner {
    tracer: Arc<dyn TraceRecorder>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl std::fmt::Debug for StepRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepRunner")
            .field("has_notifier", &self.notifier.is_some())
            .finish()
    }
}

impl StepRunner {
    pub fn new(tracer: Arc<dyn TraceRecorder>) -> Self {
        Self {
            tracer,
            notifier: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn tracer(&self) -> &Arc<dyn TraceRecorder> {
        &self.tracer
    }

    /// Look up `kind` in `registry` and run it
    pub async fn run_kind(
        &self,
        registry: &StepRegistry,
        kind: StepKind,
        ctx: &mut ExecutionContext,
    ) -> Result<(), WorkflowError> {
        let step = registry.get(kind)?;
        self.run(step.as_ref(), ctx).await
    }

    pub async fn run(&self, step: &dyn Step, ctx: &mut ExecutionContext) -> Result<(), WorkflowError> {
        let step_name = step.name();
        let execution_id = ctx.execution_id.as_str().to_string();

        let trace_id = match self.tracer.create_trace(&execution_id, step_name).await {
            Ok(trace_id) => Some(trace_id),
            Err(e) => {
                warn!(execution_id = %execution_id, step = step_name, error = %e, "Failed to create step trace");
                None
            }
        };
        ctx.trace_id = trace_id.clone();

        if let (Some(notifier), Some(channel)) = (&self.notifier, ctx.request.channel.as_deref()) {
            notifier
                .notify_step_start(channel, &execution_id, step_name)
                .await;
        }

        debug!(execution_id = %execution_id, step = step_name, "Running step");

        match step.run(ctx).await {
            Ok(()) => {
                if let Some(ref trace_id) = trace_id {
                    self.close_trace(trace_id, ctx).await;
                }

                if let (Some(notifier), Some(channel)) =
                    (&self.notifier, ctx.request.channel.as_deref())
                {
                    notifier
                        .notify_step_end(channel, &execution_id, step_name, step_summary(ctx))
                        .await;
                }

                Ok(())
            }
            Err(err) => {
                error!(execution_id = %execution_id, step = step_name, error = %err, "Step failed");

                if let Some(ref trace_id) = trace_id {
                    if let Err(e) = self.tracer.mark_trace_error(trace_id, &err.to_string()).await {
                        warn!(trace_id = %trace_id, error = %e, "Failed to mark trace as errored");
                    }
                }

                Err(err)
            }
        }
    }

    async fn close_trace(&self, trace_id: &str, ctx: &ExecutionContext) {
        if let Err(e) = self.tracer.complete_trace(trace_id).await {
            warn!(trace_id = %trace_id, error = %e, "Failed to complete trace");
        }

        if let Err(e) = self.tracer.save_context_snapshot(trace_id, ctx.snapshot()).await {
            warn!(trace_id = %trace_id, error = %e, "Failed to save context snapshot");
        }
    }
}

fn step_summary(ctx: &ExecutionContext) -> serde_json::Value {
    json!({
        "status": ctx.status,
        "selected_target": ctx.progress.selected_target,
        "row_count": ctx.progress.row_count,
        "query_error": ctx.flags.query_error,
        "awaiting_clarification": ctx.flags.awaiting_clarification,
    })
}

//! Workflow domain module
//!
//! Core types of the orchestration engine:
//! - [`ExecutionContext`] - per-request state with a family-specific payload
//! - [`Step`] and [`StepRegistry`] - units of work keyed by [`StepKind`]
//! - [`StateStore`] - expiring store of in-flight contexts
//! - [`Checkpoint`] - where a suspended instance resumes
//! - [`apply_clarification`] - merge of human input into a suspended context

mod catalog;
mod context;
mod error;
mod execution;
mod hil;
mod outcome;
mod stage;
pub mod state_store;
pub mod step;

pub use catalog::{ApiCatalog, ApiSpec, ParamResolution, TableCatalog, TableSpec};
pub use context::{
    parse_date, ControlFlags, DateRange, DslFilter, DslOrder, ExecutionContext, ExecutionId,
    FamilyPayload, PeriodGranularity, QueryProgress, RequestClass, RequestFields, Row,
    SemanticDsl, SemanticPayload, SupervisorPayload, ToolUsePayload, WorkflowFamily,
    WorkflowStatus, MAX_EXECUTION_ID_LENGTH,
};
pub use error::WorkflowError;
pub use execution::{SubExecution, SubExecutionStatus};
pub use hil::{apply_clarification, date_clarification_message, ClarificationInput, ClarificationKind};
pub use outcome::{ResultPage, WorkflowOutcome};
pub use stage::{Checkpoint, SemanticStage, SupervisorStage, TableSqlStage, ToolUseStage};
pub use state_store::{ContextUpdate, StateStore};
pub use step::{Step, StepKind, StepRegistry};

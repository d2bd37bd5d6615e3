//! Domain layer - Core orchestration types and collaborator traits

pub mod error;
pub mod llm;
pub mod notify;
pub mod query;
pub mod retrieval;
pub mod trace;
pub mod workflow;

pub use error::DomainError;
pub use llm::LlmClient;
pub use notify::{Notifier, StepEvent, StepPhase};
pub use query::QueryExecutor;
pub use retrieval::{ExamplePair, FewShotSearch, NL2SQL_COLLECTION, SELECTOR_COLLECTION};
pub use trace::{TraceRecord, TraceRecorder, TraceStatus};
pub use workflow::{
    ExecutionContext, ExecutionId, Step, StepKind, StepRegistry, WorkflowError, WorkflowFamily,
    WorkflowOutcome, WorkflowStatus,
};

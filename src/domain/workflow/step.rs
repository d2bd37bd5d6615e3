//! Steps and the typed step registry

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::context::ExecutionContext;
use super::error::WorkflowError;

/// Identifier of every step the engine knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    // Supervisor
    ClassifyRequest,
    SplitQuestion,
    PostProcess,
    SmallTalk,
    // Table SQL
    SelectTable,
    ExtractDates,
    GenerateQuery,
    ExecuteQuery,
    CorrectQuery,
    // Tool use
    SelectApi,
    ExtractParams,
    ResolvePeriod,
    InvokeApi,
    // Semantic query
    CheckDates,
    ExtractMetrics,
    ExtractFilter,
    Manipulate,
    DslToSql,
    // Shared terminal steps
    Respond,
    RespondNoData,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClassifyRequest => "classify_request",
            Self::SplitQuestion => "split_question",
            Self::PostProcess => "post_process",
            Self::SmallTalk => "small_talk",
            Self::SelectTable => "select_table",
            Self::ExtractDates => "extract_dates",
            Self::GenerateQuery => "generate_query",
            Self::ExecuteQuery => "execute_query",
            Self::CorrectQuery => "correct_query",
            Self::SelectApi => "select_api",
            Self::ExtractParams => "extract_params",
            Self::ResolvePeriod => "resolve_period",
            Self::InvokeApi => "invoke_api",
            Self::CheckDates => "check_dates",
            Self::ExtractMetrics => "extract_metrics",
            Self::ExtractFilter => "extract_filter",
            Self::Manipulate => "manipulate",
            Self::DslToSql => "dsl_to_sql",
            Self::Respond => "respond",
            Self::RespondNoData => "respond_no_data",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A unit of work in a pipeline
#[async_trait]
pub trait Step: Send + Sync + fmt::Debug {
    fn kind(&self) -> StepKind;

    fn name(&self) -> &'static str {
        self.kind().as_str()
    }

    async fn run(&self, ctx: &mut ExecutionContext) -> Result<(), WorkflowError>;
}

/// Steps available to the controllers, keyed by kind
#[derive(Debug, Clone, Default)]
pub struct StepRegistry {
    steps: HashMap<StepKind, Arc<dyn Step>>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a step under its own kind, replacing any previous one
    pub fn register(&mut self, step: Arc<dyn Step>) {
        self.steps.insert(step.kind(), step);
    }

    pub fn with_step(mut self, step: Arc<dyn Step>) -> Self {
        self.register(step);
        self
    }

    pub fn get(&self, kind: StepKind) -> Result<Arc<dyn Step>, WorkflowError> {
        self.steps
            .get(&kind)
            .cloned()
            .ok_or_else(|| WorkflowError::unknown_step(kind.as_str()))
    }

    pub fn contains(&self, kind: StepKind) -> bool {
        self.steps.contains_key(&kind)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Fail with the first missing kind from `required`
    pub fn validate(&self, required: &[StepKind]) -> Result<(), WorkflowError> {
        match required.iter().find(|kind| !self.contains(**kind)) {
            Some(kind) => Err(WorkflowError::unknown_step(kind.as_str())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::Mutex;

    type Action = dyn Fn(&mut ExecutionContext) -> Result<(), WorkflowError> + Send + Sync;

    /// Shared log of step kinds in the order they ran
    #[derive(Debug, Clone, Default)]
    pub struct CallLog(Arc<Mutex<Vec<StepKind>>>);

    impl CallLog {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push(&self, kind: StepKind) {
            self.0.lock().unwrap().push(kind);
        }

        pub fn calls(&self) -> Vec<StepKind> {
            self.0.lock().unwrap().clone()
        }

        pub fn count(&self, kind: StepKind) -> usize {
            self.calls().iter().filter(|k| **k == kind).count()
        }
    }

    /// Step whose behaviour is a closure, recording every call
    pub struct ScriptedStep {
        kind: StepKind,
        log: CallLog,
        action: Box<Action>,
    }

    impl ScriptedStep {
        pub fn new<F>(kind: StepKind, log: &CallLog, action: F) -> Arc<Self>
        where
            F: Fn(&mut ExecutionContext) -> Result<(), WorkflowError> + Send + Sync + 'static,
        {
            Arc::new(Self {
                kind,
                log: log.clone(),
                action: Box::new(action),
            })
        }

        /// Step that only records its call
        pub fn noop(kind: StepKind, log: &CallLog) -> Arc<Self> {
            Self::new(kind, log, |_| Ok(()))
        }
    }

    impl fmt::Debug for ScriptedStep {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("ScriptedStep")
                .field("kind", &self.kind)
                .finish()
        }
    }

    #[async_trait]
    impl Step for ScriptedStep {
        fn kind(&self) -> StepKind {
            self.kind
        }

        async fn run(&self, ctx: &mut ExecutionContext) -> Result<(), WorkflowError> {
            self.log.push(self.kind);
            (self.action)(ctx)
        }
    }
}

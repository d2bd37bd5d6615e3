//! Orchestration engine: step implementations, pipeline controllers and the
//! [`Orchestrator`] facade

pub mod controller;
pub mod messages;
mod orchestrator;
mod parse;
mod prompts;
mod query_runner;
mod runner;
mod safeguard;
pub mod steps;

pub use controller::{
    Controller, PipelineCore, SemanticQueryController, SmallTalkController,
    SupervisorController, TableSqlController, ToolUseController,
};
pub use orchestrator::Orchestrator;
pub use query_runner::{QueryPage, QueryRunner};
pub use runner::StepRunner;
pub use safeguard::{SafeguardLoop, SafeguardOutcome};

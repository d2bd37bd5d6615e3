//! Pipeline stages and resume checkpoints
//!
//! Each controller is a state machine over its own stage enum. When a step
//! suspends an instance, the controller stores the stage it must re-enter on
//! resume as a [`Checkpoint`] on the context.

use serde::{Deserialize, Serialize};

use super::context::WorkflowFamily;

/// Stages of the table-SQL pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableSqlStage {
    SelectTable,
    ExtractDates,
    GenerateQuery,
    ExecuteQuery,
    Respond,
}

/// Stages of the tool/API pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolUseStage {
    SelectApi,
    ExtractParams,
    ResolvePeriod,
    InvokeApi,
    Respond,
}

/// Stages of the semantic-query pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticStage {
    CheckDates,
    ExtractMetrics,
    ExtractFilter,
    Manipulate,
    DslToSql,
}

/// Stages of the supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorStage {
    Classify,
    Split,
    FanOut,
    Aggregate,
}

/// Stage a suspended instance re-enters on resume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "family", content = "stage", rename_all = "snake_case")]
pub enum Checkpoint {
    TableSql(TableSqlStage),
    ToolUse(ToolUseStage),
    SemanticQuery(SemanticStage),
    Supervisor(SupervisorStage),
}

impl Checkpoint {
    pub fn family(&self) -> WorkflowFamily {
        match self {
            Self::TableSql(_) => WorkflowFamily::TableSql,
            Self::ToolUse(_) => WorkflowFamily::ToolUse,
            Self::SemanticQuery(_) => WorkflowFamily::SemanticQuery,
            Self::Supervisor(_) => WorkflowFamily::Supervisor,
        }
    }
}

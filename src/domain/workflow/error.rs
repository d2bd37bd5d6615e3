//! Workflow error types

use thiserror::Error;

use crate::domain::DomainError;

/// Errors that can occur while orchestrating a workflow instance
#[derive(Debug, Clone, Error, PartialEq)]
pub enum WorkflowError {
    #[error("Workflow instance not found: {0}")]
    NotFound(String),

    #[error("Workflow instance already exists: {0}")]
    AlreadyExists(String),

    #[error("Workflow instance is not awaiting clarification: {0}")]
    NotAwaitingClarification(String),

    #[error("Step not registered: {0}")]
    UnknownStep(String),

    #[error("Step execution failed in '{step}': {message}")]
    StepExecution { step: String, message: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Context belongs to the '{actual}' family, expected '{expected}'")]
    WrongFamily { expected: String, actual: String },

    #[error("Collaborator call failed: {0}")]
    Collaborator(String),
}

impl WorkflowError {
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound(id.into())
    }

    pub fn already_exists(id: impl Into<String>) -> Self {
        Self::AlreadyExists(id.into())
    }

    pub fn not_awaiting_clarification(id: impl Into<String>) -> Self {
        Self::NotAwaitingClarification(id.into())
    }

    pub fn unknown_step(name: impl Into<String>) -> Self {
        Self::UnknownStep(name.into())
    }

    pub fn step_execution(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StepExecution {
            step: step.into(),
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn wrong_family(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::WrongFamily {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<DomainError> for WorkflowError {
    fn from(err: DomainError) -> Self {
        Self::Collaborator(err.to_string())
    }
}

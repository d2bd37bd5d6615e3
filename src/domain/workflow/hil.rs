//! Human-in-the-loop clarification protocol
//!
//! A step that cannot continue without more information calls
//! [`ExecutionContext::request_clarification`]. The controller then persists
//! the context and returns a suspended status. A later resume merges the
//! user's [`ClarificationInput`] into the context with [`apply_clarification`]
//! before the controller re-enters its checkpoint stage.

use serde::{Deserialize, Serialize};

use super::context::{DateRange, ExecutionContext};
use super::error::WorkflowError;

/// What kind of clarification a suspended instance is waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClarificationKind {
    /// The analysis period could not be determined from the question
    #[serde(rename = "date_clarification")]
    DateRange,
    /// The question itself needs more detail
    #[serde(rename = "question_clarification")]
    Question,
}

impl ClarificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DateRange => "date_clarification",
            Self::Question => "question_clarification",
        }
    }
}

impl std::fmt::Display for ClarificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Input supplied by the user when resuming a suspended instance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClarificationInput {
    /// Start of the period, `YYYY-MM-DD` or `YYYYMMDD`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_date: Option<String>,

    /// End of the period, `YYYY-MM-DD` or `YYYYMMDD`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_date: Option<String>,

    /// Free-text addition to the question
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl ClarificationInput {
    pub fn date_range(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from_date: Some(from.into()),
            to_date: Some(to.into()),
            text: None,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            from_date: None,
            to_date: None,
            text: Some(text.into()),
        }
    }

    /// Parse the supplied period, if both ends are present
    pub fn parsed_range(&self) -> Result<DateRange, WorkflowError> {
        match (self.from_date.as_deref(), self.to_date.as_deref()) {
            (Some(from), Some(to)) => DateRange::parse(from, to),
            _ => Err(WorkflowError::invalid_input(
                "both from_date and to_date are required",
            )),
        }
    }
}

/// Validate that `ctx` is waiting for input and merge `input` into it.
///
/// On success the clarification flag, kind, message and checkpoint-independent
/// HIL state are cleared; the checkpoint itself is left for the controller.
pub fn apply_clarification(
    ctx: &mut ExecutionContext,
    input: &ClarificationInput,
) -> Result<(), WorkflowError> {
    if !ctx.flags.awaiting_clarification {
        return Err(WorkflowError::not_awaiting_clarification(
            ctx.execution_id.as_str(),
        ));
    }

    match ctx.flags.clarification {
        Some(ClarificationKind::DateRange) => {
            let range = input.parsed_range()?;
            ctx.progress.date_range = Some(range);
            ctx.flags.invalid_date = false;
        }
        Some(ClarificationKind::Question) | None => {
            let text = input
                .text
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .ok_or_else(|| WorkflowError::invalid_input("clarification text is required"))?;

            ctx.request.question = format!("{} {}", ctx.request.question.trim(), text);
        }
    }

    ctx.clear_clarification();
    Ok(())
}

/// Message shown to the user when the analysis period is ambiguous
pub fn date_clarification_message(question: &str) -> String {
    format!(
        "I could not determine the date range for \"{}\".\n\n\
         Please tell me the period you want to analyse, for example:\n\
         - from January to March 2024\n\
         - the last 3 months\n\
         - all of last year\n\
         - the first half of 2024",
        question.trim()
    )
}

//! Period extraction shared by the table-SQL, tool-use and semantic pipelines

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use serde_json::Value;
use tracing::{info, warn};

use super::StepDeps;
use crate::domain::llm::LlmClient;
use crate::domain::workflow::{
    apply_clarification, date_clarification_message, parse_date, ClarificationInput,
    ClarificationKind, DateRange, ExecutionContext, Step, StepKind, WorkflowError,
};
use crate::infrastructure::workflow::{parse, prompts};

/// Source of today's date, fixed in tests
#[derive(Debug, Clone, Copy, Default)]
pub struct Clock {
    fixed: Option<NaiveDate>,
}

impl Clock {
    pub fn system() -> Self {
        Self::default()
    }

    pub fn fixed(today: NaiveDate) -> Self {
        Self { fixed: Some(today) }
    }

    pub fn today(&self) -> NaiveDate {
        self.fixed.unwrap_or_else(|| Local::now().date_naive())
    }
}

/// Result of validating an extracted period
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DateCheck {
    Resolved { range: DateRange, clamped: bool },
    /// No period in the question; ask the user
    Missing,
    Invalid(String),
}

/// Validate a period against `today`. An end date in the future is clamped
/// to today; a start date in the future makes the period invalid.
pub fn check_dates(from: Option<&str>, to: Option<&str>, today: NaiveDate) -> DateCheck {
    let (Some(from), Some(to)) = (from, to) else {
        return DateCheck::Missing;
    };

    let (start, end) = match (parse_date(from), parse_date(to)) {
        (Ok(start), Ok(end)) => (start, end),
        (Err(e), _) | (_, Err(e)) => return DateCheck::Invalid(e.to_string()),
    };

    if start > today {
        return DateCheck::Invalid(format!("start date {} is in the future", start));
    }

    let clamped = end > today;
    let end = end.min(today);

    match DateRange::new(start, end) {
        Ok(range) => DateCheck::Resolved { range, clamped },
        Err(e) => DateCheck::Invalid(e.to_string()),
    }
}

/// Store the outcome of [`check_dates`] on the context
pub fn apply_date_check(ctx: &mut ExecutionContext, check: DateCheck) {
    match check {
        DateCheck::Resolved { range, clamped } => {
            if clamped {
                info!(execution_id = %ctx.execution_id, end = %range.end, "Future end date clamped to today");
            }
            ctx.progress.date_range = Some(range);
            ctx.flags.future_date_detected = clamped;
            ctx.flags.invalid_date = false;
        }
        DateCheck::Missing => {
            let message = date_clarification_message(&ctx.request.question);
            ctx.request_clarification(ClarificationKind::DateRange, message);
        }
        DateCheck::Invalid(reason) => {
            warn!(execution_id = %ctx.execution_id, reason = %reason, "Invalid period");
            ctx.progress.date_range = None;
            ctx.flags.invalid_date = true;
        }
    }
}

/// Merge a clarification into a suspended context. A period supplied by
/// the user passes the same checks as an extracted one: a future start or
/// an unparseable date is rejected with the context left untouched, and a
/// future end is clamped to today.
pub fn merge_clarification(
    ctx: &mut ExecutionContext,
    input: &ClarificationInput,
    today: NaiveDate,
) -> Result<(), WorkflowError> {
    let wants_period = ctx.flags.awaiting_clarification
        && ctx.flags.clarification == Some(ClarificationKind::DateRange);
    if !wants_period {
        return apply_clarification(ctx, input);
    }

    let check = check_dates(input.from_date.as_deref(), input.to_date.as_deref(), today);
    if let DateCheck::Invalid(reason) = &check {
        return Err(WorkflowError::invalid_input(reason.clone()));
    }

    apply_clarification(ctx, input)?;
    apply_date_check(ctx, check);
    Ok(())
}

/// Asks the model for the question's period. Registered as `ExtractDates`
/// for table SQL and as `CheckDates` for semantic queries.
#[derive(Debug)]
pub struct DateExtractionStep {
    kind: StepKind,
    llm: Arc<dyn LlmClient>,
    clock: Clock,
}

impl DateExtractionStep {
    pub fn extract_dates(deps: &StepDeps) -> Self {
        Self::with_kind(StepKind::ExtractDates, deps)
    }

    pub fn check_dates(deps: &StepDeps) -> Self {
        Self::with_kind(StepKind::CheckDates, deps)
    }

    fn with_kind(kind: StepKind, deps: &StepDeps) -> Self {
        Self {
            kind,
            llm: deps.llm.clone(),
            clock: deps.clock,
        }
    }
}

#[async_trait]
impl Step for DateExtractionStep {
    fn kind(&self) -> StepKind {
        self.kind
    }

    async fn run(&self, ctx: &mut ExecutionContext) -> Result<(), WorkflowError> {
        let today = self.clock.today();
        let prompt = prompts::extract_dates(&ctx.request.question, today);
        let reply = self.llm.call(&prompt, self.name()).await?;

        let value = parse::extract_json(&reply).unwrap_or(Value::Null);
        let from = parse::string_field(&value, "from_date");
        let to = parse::string_field(&value, "to_date");

        apply_date_check(ctx, check_dates(from.as_deref(), to.as_deref(), today));
        Ok(())
    }
}

//! Execution context shared by every pipeline family
//!
//! One [`ExecutionContext`] is created per workflow instance. It carries a
//! common core (request, progress, flags, counters, answer) plus a tagged
//! [`FamilyPayload`] with the fields only one family needs. Supervisor
//! sub-executions get their own context, projected from the parent with
//! [`ExecutionContext::for_sub_execution`].

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use super::error::WorkflowError;
use super::execution::SubExecution;
use super::hil::ClarificationKind;
use super::stage::Checkpoint;

/// Maximum length for execution IDs
pub const MAX_EXECUTION_ID_LENGTH: usize = 64;

/// Answer recorded when a terminal transition carries no text
const EMPTY_ANSWER: &str = "No answer was produced for this request.";

static EXECUTION_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9_-]*$").unwrap());

/// One result row: ordered column name to value
pub type Row = Map<String, Value>;

/// Identifier of one workflow instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ExecutionId(String);

impl ExecutionId {
    /// Create a validated execution ID
    pub fn new(id: impl Into<String>) -> Result<Self, WorkflowError> {
        let id = id.into();

        if id.is_empty() {
            return Err(WorkflowError::invalid_input("Execution ID cannot be empty"));
        }

        if id.len() > MAX_EXECUTION_ID_LENGTH {
            return Err(WorkflowError::invalid_input(format!(
                "Execution ID exceeds maximum length of {} characters",
                MAX_EXECUTION_ID_LENGTH
            )));
        }

        if !EXECUTION_ID_PATTERN.is_match(&id) {
            return Err(WorkflowError::invalid_input(format!(
                "Invalid execution ID '{}': must be alphanumeric with hyphens or underscores",
                id
            )));
        }

        Ok(Self(id))
    }

    /// Generate a fresh random ID
    pub fn generate() -> Self {
        Self(format!("wf-{}", uuid::Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ExecutionId {
    type Error = WorkflowError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ExecutionId> for String {
    fn from(id: ExecutionId) -> Self {
        id.0
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for ExecutionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Pipeline family an instance belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowFamily {
    Supervisor,
    TableSql,
    ToolUse,
    SemanticQuery,
    SmallTalk,
}

impl WorkflowFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Supervisor => "supervisor",
            Self::TableSql => "table_sql",
            Self::ToolUse => "tool_use",
            Self::SemanticQuery => "semantic_query",
            Self::SmallTalk => "small_talk",
        }
    }
}

impl fmt::Display for WorkflowFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle status of an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    #[default]
    Running,
    Suspended,
    Completed,
    NoData,
    Failed,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Suspended => "suspended",
            Self::Completed => "completed",
            Self::NoData => "no_data",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::NoData | Self::Failed)
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What the caller asked and who they are
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestFields {
    pub question: String,
    pub user_id: String,
    pub company_id: String,
    /// Handle of the notification channel, if the caller is listening
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
}

impl RequestFields {
    pub fn new(
        question: impl Into<String>,
        user_id: impl Into<String>,
        company_id: impl Into<String>,
    ) -> Self {
        Self {
            question: question.into(),
            user_id: user_id.into(),
            company_id: company_id.into(),
            channel: None,
        }
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    /// Names of the required fields that are blank
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.question.trim().is_empty() {
            missing.push("question");
        }
        if self.user_id.trim().is_empty() {
            missing.push("user_id");
        }
        if self.company_id.trim().is_empty() {
            missing.push("company_id");
        }
        missing
    }
}

/// Inclusive analysis period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, WorkflowError> {
        if start > end {
            return Err(WorkflowError::invalid_input(format!(
                "start date {} is after end date {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// Parse both ends, accepting `YYYY-MM-DD` or `YYYYMMDD`
    pub fn parse(start: &str, end: &str) -> Result<Self, WorkflowError> {
        Self::new(parse_date(start)?, parse_date(end)?)
    }

    /// Compact `YYYYMMDD` rendering used in generated queries
    pub fn compact(&self) -> (String, String) {
        (
            self.start.format("%Y%m%d").to_string(),
            self.end.format("%Y%m%d").to_string(),
        )
    }
}

/// Parse a date in `YYYY-MM-DD` or `YYYYMMDD` form
pub fn parse_date(value: &str) -> Result<NaiveDate, WorkflowError> {
    let value = value.trim();
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(value, "%Y%m%d"))
        .map_err(|_| WorkflowError::invalid_input(format!("invalid date '{}'", value)))
}

/// Values accumulated while the pipeline runs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryProgress {
    /// Chosen table or API name
    pub selected_target: Option<String>,
    pub query: Option<String>,
    pub query_error: Option<String>,
    pub rows: Vec<Row>,
    pub row_count: usize,
    pub has_next: bool,
    /// Zero-based index of the page held in `rows`
    #[serde(default)]
    pub page: usize,
    pub date_range: Option<DateRange>,
}

/// Boolean control flags, all false by default
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlFlags {
    pub query_error: bool,
    pub query_changed: bool,
    /// Recomputed from the rows on every execution; never reset by hand
    pub no_data: bool,
    pub future_date_detected: bool,
    pub invalid_date: bool,
    pub awaiting_clarification: bool,
    pub clarification: Option<ClarificationKind>,
}

/// Classification of a request by the supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestClass {
    SmallTalk,
    DataQuestion,
}

/// Reporting granularity for period-aware APIs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodGranularity {
    Year,
    Quarter,
    Month,
    Day,
}

impl PeriodGranularity {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Year => "y",
            Self::Quarter => "q",
            Self::Month => "m",
            Self::Day => "d",
        }
    }

    /// Parse a one-letter code or a full name
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "y" | "year" | "yearly" => Some(Self::Year),
            "q" | "quarter" | "quarterly" => Some(Self::Quarter),
            "m" | "month" | "monthly" => Some(Self::Month),
            "d" | "day" | "daily" => Some(Self::Day),
            _ => None,
        }
    }
}

/// One filter condition of a semantic query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DslFilter {
    pub column: String,
    #[serde(default = "default_operator")]
    pub operator: String,
    pub value: Value,
}

fn default_operator() -> String {
    "=".to_string()
}

/// Ordering term of a semantic query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DslOrder {
    pub column: String,
    #[serde(default)]
    pub descending: bool,
}

/// Structured query description built by the semantic pipeline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SemanticDsl {
    pub table: String,
    pub metrics: Vec<String>,
    #[serde(default)]
    pub group_by: Vec<String>,
    #[serde(default)]
    pub filters: Vec<DslFilter>,
    #[serde(default)]
    pub order_by: Vec<DslOrder>,
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SupervisorPayload {
    pub class: Option<RequestClass>,
    pub executions: Vec<SubExecution>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolUsePayload {
    /// Parameters extracted for the selected API
    pub params: Map<String, Value>,
    pub period: Option<PeriodGranularity>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SemanticPayload {
    pub dsl: Option<SemanticDsl>,
}

/// Family-specific part of the context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum FamilyPayload {
    Supervisor(SupervisorPayload),
    TableSql,
    ToolUse(ToolUsePayload),
    SemanticQuery(SemanticPayload),
    SmallTalk,
}

impl FamilyPayload {
    /// Empty payload for `family`
    pub fn for_family(family: WorkflowFamily) -> Self {
        match family {
            WorkflowFamily::Supervisor => Self::Supervisor(SupervisorPayload::default()),
            WorkflowFamily::TableSql => Self::TableSql,
            WorkflowFamily::ToolUse => Self::ToolUse(ToolUsePayload::default()),
            WorkflowFamily::SemanticQuery => Self::SemanticQuery(SemanticPayload::default()),
            WorkflowFamily::SmallTalk => Self::SmallTalk,
        }
    }

    pub fn family(&self) -> WorkflowFamily {
        match self {
            Self::Supervisor(_) => WorkflowFamily::Supervisor,
            Self::TableSql => WorkflowFamily::TableSql,
            Self::ToolUse(_) => WorkflowFamily::ToolUse,
            Self::SemanticQuery(_) => WorkflowFamily::SemanticQuery,
            Self::SmallTalk => WorkflowFamily::SmallTalk,
        }
    }
}

/// Everything one in-flight request has accumulated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub execution_id: ExecutionId,
    pub parent_execution_id: Option<ExecutionId>,
    pub request: RequestFields,
    pub progress: QueryProgress,
    pub flags: ControlFlags,
    /// Safeguard corrections performed so far
    pub retry_count: u32,
    pub final_answer: Option<String>,
    pub clarification_message: Option<String>,
    pub checkpoint: Option<Checkpoint>,
    /// Trace of the step currently running, if any
    pub trace_id: Option<String>,
    pub status: WorkflowStatus,
    pub created_at: DateTime<Utc>,
    pub payload: FamilyPayload,
}

impl ExecutionContext {
    pub fn new(request: RequestFields, payload: FamilyPayload) -> Self {
        Self::with_id(ExecutionId::generate(), request, payload)
    }

    pub fn with_id(execution_id: ExecutionId, request: RequestFields, payload: FamilyPayload) -> Self {
        Self {
            execution_id,
            parent_execution_id: None,
            request,
            progress: QueryProgress::default(),
            flags: ControlFlags::default(),
            retry_count: 0,
            final_answer: None,
            clarification_message: None,
            checkpoint: None,
            trace_id: None,
            status: WorkflowStatus::Running,
            created_at: Utc::now(),
            payload,
        }
    }

    /// Fresh semantic-query context for one decomposed sub-question
    pub fn for_sub_execution(parent: &ExecutionContext, question: impl Into<String>) -> Self {
        let mut request = parent.request.clone();
        request.question = question.into();

        let mut ctx = Self::new(
            request,
            FamilyPayload::SemanticQuery(SemanticPayload::default()),
        );
        ctx.parent_execution_id = Some(parent.execution_id.clone());
        ctx
    }

    pub fn family(&self) -> WorkflowFamily {
        self.payload.family()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_suspended(&self) -> bool {
        self.status == WorkflowStatus::Suspended
    }

    pub fn complete(&mut self, answer: impl Into<String>) -> WorkflowStatus {
        self.finish(WorkflowStatus::Completed, answer.into())
    }

    pub fn complete_no_data(&mut self, answer: impl Into<String>) -> WorkflowStatus {
        self.finish(WorkflowStatus::NoData, answer.into())
    }

    pub fn fail(&mut self, answer: impl Into<String>) -> WorkflowStatus {
        self.finish(WorkflowStatus::Failed, answer.into())
    }

    /// Record a terminal outcome. The answer is written once; later
    /// terminal transitions keep the first answer.
    fn finish(&mut self, status: WorkflowStatus, answer: String) -> WorkflowStatus {
        if self.is_terminal() {
            warn!(
                execution_id = %self.execution_id,
                current = %self.status,
                requested = %status,
                "Ignoring terminal transition on finished context"
            );
            return self.status;
        }

        let answer = if answer.trim().is_empty() {
            EMPTY_ANSWER.to_string()
        } else {
            answer
        };

        self.final_answer = Some(answer);
        self.status = status;
        self.checkpoint = None;
        self.clear_clarification();
        self.status
    }

    /// Ask the caller for more input. The controller suspends the instance
    /// once the current step returns.
    pub fn request_clarification(&mut self, kind: ClarificationKind, message: impl Into<String>) {
        self.flags.awaiting_clarification = true;
        self.flags.clarification = Some(kind);
        self.clarification_message = Some(message.into());
    }

    /// Mark the instance suspended at `checkpoint`
    pub fn suspend(&mut self, checkpoint: Checkpoint) -> WorkflowStatus {
        self.checkpoint = Some(checkpoint);
        self.status = WorkflowStatus::Suspended;
        self.status
    }

    pub fn clear_clarification(&mut self) {
        self.flags.awaiting_clarification = false;
        self.flags.clarification = None;
        self.clarification_message = None;
        if self.status == WorkflowStatus::Suspended {
            self.status = WorkflowStatus::Running;
        }
    }

    /// Store query results and recompute the no-data flag
    pub fn record_rows(&mut self, rows: Vec<Row>) {
        self.progress.row_count = rows.len();
        self.flags.no_data = rows.is_empty();
        self.progress.rows = rows;
    }

    pub fn has_rows(&self) -> bool {
        !self.progress.rows.is_empty()
    }

    /// Record a query failure for the safeguard loop
    pub fn record_query_error(&mut self, message: impl Into<String>) {
        self.flags.query_error = true;
        self.progress.query_error = Some(message.into());
    }

    /// Clear the error state before the next safeguard attempt
    pub fn clear_query_error(&mut self) {
        self.flags.query_error = false;
        self.flags.query_changed = false;
        self.progress.query_error = None;
    }

    pub fn supervisor(&self) -> Result<&SupervisorPayload, WorkflowError> {
        match &self.payload {
            FamilyPayload::Supervisor(payload) => Ok(payload),
            other => Err(wrong_family(WorkflowFamily::Supervisor, other)),
        }
    }

    pub fn supervisor_mut(&mut self) -> Result<&mut SupervisorPayload, WorkflowError> {
        match &mut self.payload {
            FamilyPayload::Supervisor(payload) => Ok(payload),
            other => Err(wrong_family(WorkflowFamily::Supervisor, other)),
        }
    }

    pub fn tool_use(&self) -> Result<&ToolUsePayload, WorkflowError> {
        match &self.payload {
            FamilyPayload::ToolUse(payload) => Ok(payload),
            other => Err(wrong_family(WorkflowFamily::ToolUse, other)),
        }
    }

    pub fn tool_use_mut(&mut self) -> Result<&mut ToolUsePayload, WorkflowError> {
        match &mut self.payload {
            FamilyPayload::ToolUse(payload) => Ok(payload),
            other => Err(wrong_family(WorkflowFamily::ToolUse, other)),
        }
    }

    pub fn semantic(&self) -> Result<&SemanticPayload, WorkflowError> {
        match &self.payload {
            FamilyPayload::SemanticQuery(payload) => Ok(payload),
            other => Err(wrong_family(WorkflowFamily::SemanticQuery, other)),
        }
    }

    pub fn semantic_mut(&mut self) -> Result<&mut SemanticPayload, WorkflowError> {
        match &mut self.payload {
            FamilyPayload::SemanticQuery(payload) => Ok(payload),
            other => Err(wrong_family(WorkflowFamily::SemanticQuery, other)),
        }
    }

    /// Fail with `WrongFamily` unless the context belongs to `family`
    pub fn ensure_family(&self, family: WorkflowFamily) -> Result<(), WorkflowError> {
        if self.family() == family {
            Ok(())
        } else {
            Err(wrong_family(family, &self.payload))
        }
    }

    /// JSON snapshot persisted alongside step traces
    pub fn snapshot(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

fn wrong_family(expected: WorkflowFamily, actual: &FamilyPayload) -> WorkflowError {
    WorkflowError::wrong_family(expected.as_str(), actual.family().as_str())
}

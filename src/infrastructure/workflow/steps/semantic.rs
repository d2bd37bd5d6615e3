//! Semantic-query steps: build a structured query description and render it as SQL

use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::StepDeps;
use crate::domain::llm::LlmClient;
use crate::domain::query::sql::quote_literal;
use crate::domain::workflow::{
    DateRange, DslFilter, DslOrder, ExecutionContext, SemanticDsl, Step, StepKind, TableCatalog,
    TableSpec, WorkflowError,
};
use crate::infrastructure::workflow::{parse, prompts};

static IDENTIFIER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

static METRIC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(?:(?:sum|avg|min|max|count)\(\s*(?:\*|[a-z_][a-z0-9_]*)\s*\)|[a-z_][a-z0-9_]*)$",
    )
    .unwrap()
});

const OPERATORS: &[&str] = &["=", "!=", "<>", "<", "<=", ">", ">=", "LIKE", "IN", "NOT IN"];

#[derive(Debug, Deserialize)]
struct MetricsReply {
    #[serde(default)]
    table: String,
    #[serde(default)]
    metrics: Vec<String>,
    #[serde(default)]
    group_by: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ManipulateReply {
    #[serde(default)]
    order_by: Vec<DslOrder>,
    #[serde(default)]
    limit: Option<u32>,
}

fn current_dsl(ctx: &ExecutionContext, step: StepKind) -> Result<SemanticDsl, WorkflowError> {
    ctx.semantic()?
        .dsl
        .clone()
        .ok_or_else(|| WorkflowError::step_execution(step.as_str(), "no metrics extracted"))
}

/// Extracts the table, metrics and grouping. Leaves no description when the
/// question names no figures.
#[derive(Debug)]
pub struct ExtractMetricsStep {
    llm: Arc<dyn LlmClient>,
    tables: Arc<TableCatalog>,
}

impl ExtractMetricsStep {
    pub fn new(deps: &StepDeps) -> Self {
        Self {
            llm: deps.llm.clone(),
            tables: deps.tables.clone(),
        }
    }
}

#[async_trait]
impl Step for ExtractMetricsStep {
    fn kind(&self) -> StepKind {
        StepKind::ExtractMetrics
    }

    async fn run(&self, ctx: &mut ExecutionContext) -> Result<(), WorkflowError> {
        let prompt = prompts::extract_metrics(&ctx.request.question, &self.tables.describe());
        let reply = self.llm.call(&prompt, self.name()).await?;

        let dsl = parse::parse_json::<MetricsReply>(&reply).and_then(|parsed| {
            let table = self.tables.get(&parsed.table)?;
            let metrics: Vec<String> = parsed
                .metrics
                .iter()
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty())
                .collect();
            (!metrics.is_empty()).then(|| SemanticDsl {
                table: table.name.clone(),
                metrics,
                group_by: parsed.group_by,
                ..Default::default()
            })
        });

        if dsl.is_none() {
            warn!(execution_id = %ctx.execution_id, "No metrics extracted");
        }
        ctx.progress.selected_target = dsl.as_ref().map(|d| d.table.clone());
        ctx.semantic_mut()?.dsl = dsl;
        Ok(())
    }
}

#[derive(Debug)]
pub struct ExtractFilterStep {
    llm: Arc<dyn LlmClient>,
}

impl ExtractFilterStep {
    pub fn new(deps: &StepDeps) -> Self {
        Self {
            llm: deps.llm.clone(),
        }
    }
}

#[async_trait]
impl Step for ExtractFilterStep {
    fn kind(&self) -> StepKind {
        StepKind::ExtractFilter
    }

    async fn run(&self, ctx: &mut ExecutionContext) -> Result<(), WorkflowError> {
        let dsl = current_dsl(ctx, self.kind())?;
        let prompt = prompts::extract_filter(&ctx.request.question, &dsl);
        let reply = self.llm.call(&prompt, self.name()).await?;

        let filters = parse::parse_json::<Vec<DslFilter>>(&reply).unwrap_or_else(|| {
            warn!(execution_id = %ctx.execution_id, "Unparseable filter reply; no filters applied");
            Vec::new()
        });

        if let Some(dsl) = ctx.semantic_mut()?.dsl.as_mut() {
            dsl.filters = filters;
        }
        Ok(())
    }
}

/// Sets ordering and row limit
#[derive(Debug)]
pub struct ManipulateStep {
    llm: Arc<dyn LlmClient>,
}

impl ManipulateStep {
    pub fn new(deps: &StepDeps) -> Self {
        Self {
            llm: deps.llm.clone(),
        }
    }
}

#[async_trait]
impl Step for ManipulateStep {
    fn kind(&self) -> StepKind {
        StepKind::Manipulate
    }

    async fn run(&self, ctx: &mut ExecutionContext) -> Result<(), WorkflowError> {
        let dsl = current_dsl(ctx, self.kind())?;
        let prompt = prompts::manipulate(&ctx.request.question, &dsl);
        let reply = self.llm.call(&prompt, self.name()).await?;

        let manipulation = parse::parse_json::<ManipulateReply>(&reply).unwrap_or_default();

        if let Some(dsl) = ctx.semantic_mut()?.dsl.as_mut() {
            dsl.order_by = manipulation.order_by;
            dsl.limit = manipulation.limit;
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct DslToSqlStep {
    tables: Arc<TableCatalog>,
}

impl DslToSqlStep {
    pub fn new(deps: &StepDeps) -> Self {
        Self {
            tables: deps.tables.clone(),
        }
    }
}

#[async_trait]
impl Step for DslToSqlStep {
    fn kind(&self) -> StepKind {
        StepKind::DslToSql
    }

    async fn run(&self, ctx: &mut ExecutionContext) -> Result<(), WorkflowError> {
        let dsl = current_dsl(ctx, self.kind())?;
        let table = self
            .tables
            .get(&dsl.table)
            .ok_or_else(|| WorkflowError::step_execution(self.name(), format!("unknown table '{}'", dsl.table)))?;
        let range = ctx
            .progress
            .date_range
            .ok_or_else(|| WorkflowError::step_execution(self.name(), "no date range"))?;

        let sql = render_sql(&dsl, table, &range, &ctx.request.company_id)?;
        debug!(execution_id = %ctx.execution_id, sql = %sql, "Semantic query rendered");
        ctx.progress.query = Some(sql);
        Ok(())
    }
}

fn invalid(message: String) -> WorkflowError {
    WorkflowError::step_execution(StepKind::DslToSql.as_str(), message)
}

fn identifier(name: &str) -> Result<&str, WorkflowError> {
    let name = name.trim();
    if IDENTIFIER.is_match(name) {
        Ok(name)
    } else {
        Err(invalid(format!("invalid column '{}'", name)))
    }
}

fn metric(expr: &str) -> Result<&str, WorkflowError> {
    let expr = expr.trim();
    if METRIC.is_match(expr) {
        Ok(expr)
    } else {
        Err(invalid(format!("invalid metric '{}'", expr)))
    }
}

fn literal(value: &Value) -> Result<String, WorkflowError> {
    match value {
        Value::String(s) => Ok(quote_literal(s)),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(if *b { "TRUE" } else { "FALSE" }.to_string()),
        other => Err(invalid(format!("unsupported filter value {}", other))),
    }
}

fn condition(filter: &DslFilter) -> Result<String, WorkflowError> {
    let column = identifier(&filter.column)?;
    let operator = filter.operator.trim().to_ascii_uppercase();
    if !OPERATORS.contains(&operator.as_str()) {
        return Err(invalid(format!("unsupported operator '{}'", filter.operator)));
    }

    let value = match (&filter.value, operator.as_str()) {
        (Value::Array(items), "IN" | "NOT IN") => {
            let items = items.iter().map(literal).collect::<Result<Vec<_>, _>>()?;
            format!("({})", items.join(", "))
        }
        (_, "IN" | "NOT IN") => format!("({})", literal(&filter.value)?),
        (value, _) => literal(value)?,
    };

    Ok(format!("{} {} {}", column, operator, value))
}

/// Render a semantic query description as one SELECT restricted to the
/// company and the analysis period
pub fn render_sql(
    dsl: &SemanticDsl,
    table: &TableSpec,
    range: &DateRange,
    company_id: &str,
) -> Result<String, WorkflowError> {
    let group_by = dsl
        .group_by
        .iter()
        .map(|c| identifier(c))
        .collect::<Result<Vec<_>, _>>()?;
    let metrics = dsl
        .metrics
        .iter()
        .map(|m| metric(m))
        .collect::<Result<Vec<_>, _>>()?;

    let (start, end) = range.compact();
    let mut conditions = vec![
        format!("com_id = {}", quote_literal(company_id)),
        format!(
            "{} BETWEEN {} AND {}",
            table.date_column,
            quote_literal(&start),
            quote_literal(&end)
        ),
    ];
    for filter in &dsl.filters {
        conditions.push(condition(filter)?);
    }

    let columns: Vec<&str> = group_by.iter().chain(metrics.iter()).copied().collect();
    let mut sql = format!(
        "SELECT {} FROM {} WHERE {}",
        columns.join(", "),
        table.name,
        conditions.join(" AND ")
    );

    if !group_by.is_empty() {
        sql.push_str(&format!(" GROUP BY {}", group_by.join(", ")));
    }

    if !dsl.order_by.is_empty() {
        let terms = dsl
            .order_by
            .iter()
            .map(|o| {
                metric(&o.column).map(|c| {
                    format!("{} {}", c, if o.descending { "DESC" } else { "ASC" })
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        sql.push_str(&format!(" ORDER BY {}", terms.join(", ")));
    }

    if let Some(limit) = dsl.limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }

    Ok(sql)
}

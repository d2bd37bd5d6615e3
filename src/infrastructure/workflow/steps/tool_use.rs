//! Tool-use steps: choose an API, extract its parameters and invoke it

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{info, warn};

use super::dates::{apply_date_check, check_dates, Clock};
use super::{few_shots, StepDeps};
use crate::domain::llm::LlmClient;
use crate::domain::query::sql::quote_literal;
use crate::domain::retrieval::{FewShotSearch, SELECTOR_COLLECTION};
use crate::domain::workflow::{
    ApiCatalog, ExecutionContext, PeriodGranularity, Step, StepKind, WorkflowError,
};
use crate::infrastructure::workflow::query_runner::QueryRunner;
use crate::infrastructure::workflow::{parse, prompts};

#[derive(Debug)]
pub struct SelectApiStep {
    llm: Arc<dyn LlmClient>,
    few_shots: Arc<dyn FewShotSearch>,
    apis: Arc<ApiCatalog>,
}

impl SelectApiStep {
    pub fn new(deps: &StepDeps) -> Self {
        Self {
            llm: deps.llm.clone(),
            few_shots: deps.few_shots.clone(),
            apis: deps.apis.clone(),
        }
    }
}

#[async_trait]
impl Step for SelectApiStep {
    fn kind(&self) -> StepKind {
        StepKind::SelectApi
    }

    async fn run(&self, ctx: &mut ExecutionContext) -> Result<(), WorkflowError> {
        let question = ctx.request.question.clone();
        let examples = few_shots(self.few_shots.as_ref(), &question, SELECTOR_COLLECTION).await;

        let prompt = prompts::select_api(&question, &self.apis.describe(), &examples);
        let reply = self.llm.call(&prompt, self.name()).await?;

        let api = parse::clean_name(&reply)
            .and_then(|name| self.apis.get(&name))
            .map(|spec| spec.name.clone());

        if api.is_none() {
            warn!(execution_id = %ctx.execution_id, reply = %reply.trim(), "No API matched");
        }
        ctx.progress.selected_target = api;
        Ok(())
    }
}

/// Extracts the API parameters. The period inside them goes through the
/// same validation as table-SQL dates, including the clarification request.
#[derive(Debug)]
pub struct ExtractParamsStep {
    llm: Arc<dyn LlmClient>,
    clock: Clock,
}

impl ExtractParamsStep {
    pub fn new(deps: &StepDeps) -> Self {
        Self {
            llm: deps.llm.clone(),
            clock: deps.clock,
        }
    }
}

#[async_trait]
impl Step for ExtractParamsStep {
    fn kind(&self) -> StepKind {
        StepKind::ExtractParams
    }

    async fn run(&self, ctx: &mut ExecutionContext) -> Result<(), WorkflowError> {
        let api = ctx
            .progress
            .selected_target
            .clone()
            .ok_or_else(|| WorkflowError::step_execution(self.name(), "no API selected"))?;

        let today = self.clock.today();
        let prompt = prompts::extract_params(&ctx.request.question, &api, today);
        let reply = self.llm.call(&prompt, self.name()).await?;

        let value = parse::extract_json(&reply).unwrap_or(Value::Null);
        let from = parse::string_field(&value, "from_date");
        let to = parse::string_field(&value, "to_date");

        let params = match value {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        ctx.tool_use_mut()?.params = params;

        apply_date_check(ctx, check_dates(from.as_deref(), to.as_deref(), today));
        Ok(())
    }
}

/// Picks the reporting granularity for period-aware APIs
#[derive(Debug)]
pub struct ResolvePeriodStep {
    llm: Arc<dyn LlmClient>,
}

impl ResolvePeriodStep {
    pub fn new(deps: &StepDeps) -> Self {
        Self {
            llm: deps.llm.clone(),
        }
    }
}

#[async_trait]
impl Step for ResolvePeriodStep {
    fn kind(&self) -> StepKind {
        StepKind::ResolvePeriod
    }

    async fn run(&self, ctx: &mut ExecutionContext) -> Result<(), WorkflowError> {
        let prompt = prompts::resolve_period(&ctx.request.question);
        let reply = self.llm.call(&prompt, self.name()).await?;

        let period = parse::clean_name(&reply)
            .and_then(|code| PeriodGranularity::parse(&code))
            .unwrap_or_else(|| {
                warn!(execution_id = %ctx.execution_id, reply = %reply.trim(), "Unrecognised period; using monthly");
                PeriodGranularity::Month
            });

        ctx.tool_use_mut()?.period = Some(period);
        Ok(())
    }
}

/// Calls the selected API as a table function: `api(company, from, to[, period])`
#[derive(Debug)]
pub struct InvokeApiStep {
    queries: QueryRunner,
}

impl InvokeApiStep {
    pub fn new(deps: &StepDeps) -> Self {
        Self {
            queries: deps.queries.clone(),
        }
    }
}

/// SQL invoking `api` for the context's company and period
pub fn api_call_sql(ctx: &ExecutionContext, api: &str) -> Result<String, WorkflowError> {
    let range = ctx
        .progress
        .date_range
        .ok_or_else(|| WorkflowError::step_execution(StepKind::InvokeApi.as_str(), "no date range"))?;
    let (from, to) = range.compact();

    let mut args = vec![
        quote_literal(&ctx.request.company_id),
        quote_literal(&from),
        quote_literal(&to),
    ];
    if let Some(period) = ctx.tool_use()?.period {
        args.push(quote_literal(period.code()));
    }

    Ok(format!("SELECT * FROM {}({})", api, args.join(", ")))
}

#[async_trait]
impl Step for InvokeApiStep {
    fn kind(&self) -> StepKind {
        StepKind::InvokeApi
    }

    async fn run(&self, ctx: &mut ExecutionContext) -> Result<(), WorkflowError> {
        let api = ctx
            .progress
            .selected_target
            .clone()
            .ok_or_else(|| WorkflowError::step_execution(self.name(), "no API selected"))?;

        let query = api_call_sql(ctx, &api)?;
        ctx.progress.query = Some(query.clone());

        let page = self.queries.run(&query).await?;
        info!(execution_id = %ctx.execution_id, api = %api, rows = page.rows.len(), "API invoked");

        ctx.progress.has_next = page.has_next;
        ctx.record_rows(page.rows);
        Ok(())
    }
}

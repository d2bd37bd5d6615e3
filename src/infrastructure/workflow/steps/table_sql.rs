//! Table-SQL steps: choose a table, write SQL, execute and correct it

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{few_shots, StepDeps};
use crate::domain::llm::LlmClient;
use crate::domain::query::sql::{extract_sql, fix_cross_database_refs, is_cross_database_error};
use crate::domain::retrieval::{FewShotSearch, NL2SQL_COLLECTION, SELECTOR_COLLECTION};
use crate::domain::workflow::{ExecutionContext, Step, StepKind, TableCatalog, WorkflowError};
use crate::domain::DomainError;
use crate::infrastructure::workflow::query_runner::QueryRunner;
use crate::infrastructure::workflow::{parse, prompts};

#[derive(Debug)]
pub struct SelectTableStep {
    llm: Arc<dyn LlmClient>,
    few_shots: Arc<dyn FewShotSearch>,
    tables: Arc<TableCatalog>,
}

impl SelectTableStep {
    pub fn new(deps: &StepDeps) -> Self {
        Self {
            llm: deps.llm.clone(),
            few_shots: deps.few_shots.clone(),
            tables: deps.tables.clone(),
        }
    }
}

#[async_trait]
impl Step for SelectTableStep {
    fn kind(&self) -> StepKind {
        StepKind::SelectTable
    }

    async fn run(&self, ctx: &mut ExecutionContext) -> Result<(), WorkflowError> {
        let question = ctx.request.question.clone();
        let examples = few_shots(self.few_shots.as_ref(), &question, SELECTOR_COLLECTION).await;

        let prompt = prompts::select_table(&question, &self.tables.describe(), &examples);
        let reply = self.llm.call(&prompt, self.name()).await?;

        let table = parse::clean_name(&reply)
            .and_then(|name| self.tables.get(&name))
            .map(|spec| spec.name.clone());

        match table {
            Some(ref name) => info!(execution_id = %ctx.execution_id, table = %name, "Table selected"),
            None => warn!(execution_id = %ctx.execution_id, reply = %reply.trim(), "No table matched"),
        }

        ctx.progress.selected_target = table;
        Ok(())
    }
}

#[derive(Debug)]
pub struct GenerateQueryStep {
    llm: Arc<dyn LlmClient>,
    few_shots: Arc<dyn FewShotSearch>,
    tables: Arc<TableCatalog>,
}

impl GenerateQueryStep {
    pub fn new(deps: &StepDeps) -> Self {
        Self {
            llm: deps.llm.clone(),
            few_shots: deps.few_shots.clone(),
            tables: deps.tables.clone(),
        }
    }
}

#[async_trait]
impl Step for GenerateQueryStep {
    fn kind(&self) -> StepKind {
        StepKind::GenerateQuery
    }

    async fn run(&self, ctx: &mut ExecutionContext) -> Result<(), WorkflowError> {
        let table = ctx
            .progress
            .selected_target
            .as_deref()
            .and_then(|name| self.tables.get(name))
            .ok_or_else(|| WorkflowError::step_execution(self.name(), "no table selected"))?;
        let range = ctx
            .progress
            .date_range
            .ok_or_else(|| WorkflowError::step_execution(self.name(), "no date range"))?;

        let examples = few_shots(self.few_shots.as_ref(), &ctx.request.question, NL2SQL_COLLECTION).await;
        let prompt = prompts::generate_query(
            &ctx.request.question,
            table,
            &range,
            &ctx.request.company_id,
            &examples,
        );
        let reply = self.llm.call(&prompt, self.name()).await?;

        let sql = extract_sql(&reply);
        debug!(execution_id = %ctx.execution_id, sql = %sql, "Query generated");
        ctx.progress.query = (!sql.is_empty()).then_some(sql);
        Ok(())
    }
}

/// Runs the current query. Query errors are recorded on the context for the
/// safeguard loop; any other failure fails the step.
#[derive(Debug)]
pub struct ExecuteQueryStep {
    queries: QueryRunner,
}

impl ExecuteQueryStep {
    pub fn new(deps: &StepDeps) -> Self {
        Self {
            queries: deps.queries.clone(),
        }
    }
}

#[async_trait]
impl Step for ExecuteQueryStep {
    fn kind(&self) -> StepKind {
        StepKind::ExecuteQuery
    }

    async fn run(&self, ctx: &mut ExecutionContext) -> Result<(), WorkflowError> {
        let query = ctx
            .progress
            .query
            .clone()
            .ok_or_else(|| WorkflowError::step_execution(self.name(), "no query to execute"))?;

        match self.queries.run(&query).await {
            Ok(page) => {
                ctx.flags.query_error = false;
                ctx.progress.query_error = None;
                ctx.progress.has_next = page.has_next;
                ctx.record_rows(page.rows);
                Ok(())
            }
            Err(DomainError::Query { message }) => {
                ctx.record_query_error(message);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Rewrites a failed query. Cross-database errors are fixed mechanically;
/// everything else goes back to the model.
#[derive(Debug)]
pub struct CorrectQueryStep {
    llm: Arc<dyn LlmClient>,
}

impl CorrectQueryStep {
    pub fn new(deps: &StepDeps) -> Self {
        Self {
            llm: deps.llm.clone(),
        }
    }
}

#[async_trait]
impl Step for CorrectQueryStep {
    fn kind(&self) -> StepKind {
        StepKind::CorrectQuery
    }

    async fn run(&self, ctx: &mut ExecutionContext) -> Result<(), WorkflowError> {
        let query = ctx.progress.query.clone().unwrap_or_default();
        let error = ctx.progress.query_error.clone().unwrap_or_default();

        let mut corrected = String::new();
        if is_cross_database_error(&error) {
            corrected = fix_cross_database_refs(&query);
        }
        if corrected.is_empty() || corrected == query {
            let prompt = prompts::correct_query(&ctx.request.question, &query, &error);
            let reply = self.llm.call(&prompt, self.name()).await?;
            corrected = extract_sql(&reply);
        }

        ctx.flags.query_changed = !corrected.is_empty() && corrected != query;
        if ctx.flags.query_changed {
            info!(execution_id = %ctx.execution_id, attempt = ctx.retry_count, "Query corrected");
            ctx.progress.query = Some(corrected);
        }
        Ok(())
    }
}

//! Entry point of the engine: validates requests, routes them to a
//! controller and resumes suspended instances.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::controller::{
    Controller, PipelineCore, SemanticQueryController, SmallTalkController,
    SupervisorController, TableSqlController, ToolUseController,
};
use super::messages;
use super::query_runner::{QueryPage, QueryRunner};
use super::runner::StepRunner;
use super::steps::StepDeps;
use crate::config::WorkflowConfig;
use crate::domain::trace::TraceRecorder;
use crate::domain::workflow::{
    ClarificationInput, ContextUpdate, ExecutionContext, ExecutionId, FamilyPayload, RequestFields,
    ResultPage, StateStore, StepRegistry, WorkflowError, WorkflowFamily, WorkflowOutcome,
    WorkflowStatus,
};
use crate::infrastructure::state::spawn_sweeper;

/// Facade over every controller and the shared state store
#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<dyn StateStore>,
    tracer: Arc<dyn TraceRecorder>,
    supervisor: Arc<SupervisorController>,
    table_sql: Arc<TableSqlController>,
    tool_use: Arc<ToolUseController>,
    semantic: Arc<SemanticQueryController>,
    small_talk: Arc<SmallTalkController>,
    queries: QueryRunner,
    sweep_interval: Duration,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("store", &self.store)
            .field("sweep_interval", &self.sweep_interval)
            .finish()
    }
}

impl Orchestrator {
    /// Build every controller over one registry. Fails if a controller's
    /// required steps are missing from `registry`.
    pub fn new(
        runner: StepRunner,
        registry: StepRegistry,
        store: Arc<dyn StateStore>,
        deps: &StepDeps,
        config: &WorkflowConfig,
    ) -> Result<Self, WorkflowError> {
        let tracer = runner.tracer().clone();
        let core = PipelineCore::new(Arc::new(runner), Arc::new(registry), store.clone())
            .with_clock(deps.clock);

        let semantic = Arc::new(SemanticQueryController::new(core.clone())?);
        let supervisor = Arc::new(SupervisorController::new(
            core.clone(),
            semantic.clone(),
            deps.queries.clone(),
        )?);
        let table_sql = Arc::new(TableSqlController::new(
            core.clone(),
            config.max_query_attempts,
        )?);
        let tool_use = Arc::new(ToolUseController::new(core.clone(), deps.apis.clone())?);
        let small_talk = Arc::new(SmallTalkController::new(core)?);

        Ok(Self {
            store,
            tracer,
            supervisor,
            table_sql,
            tool_use,
            semantic,
            small_talk,
            queries: deps.queries.clone(),
            sweep_interval: config.sweep_interval(),
        })
    }

    fn controller(&self, family: WorkflowFamily) -> &dyn Controller {
        match family {
            WorkflowFamily::Supervisor => self.supervisor.as_ref(),
            WorkflowFamily::TableSql => self.table_sql.as_ref(),
            WorkflowFamily::ToolUse => self.tool_use.as_ref(),
            WorkflowFamily::SemanticQuery => self.semantic.as_ref(),
            WorkflowFamily::SmallTalk => self.small_talk.as_ref(),
        }
    }

    /// Run a new request. Without an explicit `family` the supervisor routes it.
    ///
    /// A request missing its question or identifiers is stored as a failed
    /// instance carrying a fixed apology; no step runs.
    pub async fn start(
        &self,
        request: RequestFields,
        family: Option<WorkflowFamily>,
    ) -> Result<WorkflowOutcome, WorkflowError> {
        let family = family.unwrap_or(WorkflowFamily::Supervisor);
        let missing = request.missing_fields();
        let mut ctx = ExecutionContext::new(request, FamilyPayload::for_family(family));

        if !missing.is_empty() {
            warn!(execution_id = %ctx.execution_id, missing = ?missing, "Rejecting incomplete request");
            ctx.fail(messages::missing_fields(&missing));
            self.store.create(ctx.clone()).await?;
            return Ok(WorkflowOutcome::from_context(&ctx));
        }

        info!(execution_id = %ctx.execution_id, family = %family, "Dispatching request");
        let ctx = self.controller(family).execute(ctx).await?;
        self.record_completion(&ctx).await;
        Ok(WorkflowOutcome::from_context(&ctx))
    }

    /// Continue a suspended instance with the user's clarification.
    /// Sub-executions are resumed through their supervisor only.
    pub async fn resume(
        &self,
        id: &ExecutionId,
        input: &ClarificationInput,
    ) -> Result<WorkflowOutcome, WorkflowError> {
        let stored = self.store.get(id).await?;
        if let Some(parent) = &stored.parent_execution_id {
            return Err(WorkflowError::invalid_input(format!(
                "{} is a sub-execution; resume its supervisor {}",
                id, parent
            )));
        }

        let ctx = self.controller(stored.family()).resume(id, input).await?;
        self.record_completion(&ctx).await;
        Ok(WorkflowOutcome::from_context(&ctx))
    }

    /// Current stored state of an instance
    pub async fn status(&self, id: &ExecutionId) -> Result<ExecutionContext, WorkflowError> {
        self.store.get(id).await
    }

    /// Fetch the page after the one a completed instance currently holds.
    ///
    /// Pipelines re-run their stored query at the next offset. A supervisor
    /// pages every sub-question that still has rows; the returned rows are
    /// the concatenation of those pages.
    pub async fn next_page(&self, id: &ExecutionId) -> Result<ResultPage, WorkflowError> {
        let ctx = self.store.get(id).await?;
        if ctx.status != WorkflowStatus::Completed || !ctx.progress.has_next {
            return Err(WorkflowError::invalid_input(format!(
                "{} has no further page of results",
                id
            )));
        }

        let current = ctx.progress.page;
        let next = current + 1;
        info!(execution_id = %id, page = next, "Fetching next page");

        let apply: ContextUpdate = match ctx.family() {
            WorkflowFamily::Supervisor => {
                let mut pages: Vec<(usize, QueryPage)> = Vec::new();
                for (index, record) in ctx.supervisor()?.executions.iter().enumerate() {
                    let Some(query) = record.query.as_deref().filter(|_| record.can_page()) else {
                        continue;
                    };
                    let page = self
                        .queries
                        .fetch_page_with_cross_database_fix(query, record.page + 1)
                        .await?;
                    pages.push((index, page));
                }

                Box::new(move |ctx| {
                    ensure_page(ctx, current)?;
                    let mut rows = Vec::new();
                    let executions = &mut ctx.supervisor_mut()?.executions;
                    for (index, page) in pages {
                        let Some(record) = executions.get_mut(index) else {
                            continue;
                        };
                        let page_no = record.page + 1;
                        rows.extend(page.rows.iter().cloned());
                        record.mark_page(page_no, page.rows, page.has_next);
                    }
                    let has_next = executions.iter().any(|e| e.can_page());

                    ctx.record_rows(rows);
                    ctx.progress.has_next = has_next;
                    ctx.progress.page = next;
                    Ok(())
                })
            }
            _ => {
                let query = ctx.progress.query.as_deref().ok_or_else(|| {
                    WorkflowError::invalid_input(format!("{} has no stored query", id))
                })?;
                let page = self.queries.fetch_page(query, next).await?;

                Box::new(move |ctx| {
                    ensure_page(ctx, current)?;
                    ctx.record_rows(page.rows);
                    ctx.progress.has_next = page.has_next;
                    ctx.progress.page = next;
                    Ok(())
                })
            }
        };

        let ctx = self.store.update(id, apply).await?;
        Ok(ResultPage::from_context(&ctx))
    }

    pub async fn remove(&self, id: &ExecutionId) -> Result<bool, WorkflowError> {
        self.store.remove(id).await
    }

    /// Instances currently held in the state store
    pub async fn active_instances(&self) -> usize {
        self.store.len().await
    }

    /// Start the periodic eviction of idle instances
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        spawn_sweeper(self.store.clone(), self.sweep_interval)
    }

    async fn record_completion(&self, ctx: &ExecutionContext) {
        if !ctx.is_terminal() || ctx.parent_execution_id.is_some() {
            return;
        }
        let answer = ctx.final_answer.as_deref().unwrap_or_default();
        if let Err(e) = self
            .tracer
            .complete_workflow(ctx.execution_id.as_str(), answer)
            .await
        {
            warn!(execution_id = %ctx.execution_id, error = %e, "Failed to record workflow completion");
        }
    }
}

/// Reject a page update when another request moved the instance first
fn ensure_page(ctx: &ExecutionContext, expected: usize) -> Result<(), WorkflowError> {
    if ctx.progress.page == expected {
        Ok(())
    } else {
        Err(WorkflowError::invalid_input(format!(
            "{} moved to page {} concurrently",
            ctx.execution_id, ctx.progress.page
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::llm::ScriptedLlmClient;
    use crate::domain::query::ScriptedQueryExecutor;
    use crate::domain::workflow::{ClarificationKind, WorkflowStatus};
    use crate::infrastructure::state::InMemoryStateStore;
    use crate::infrastructure::trace::InMemoryTraceRecorder;
    use crate::infrastructure::workflow::steps::{default_registry, fixtures};

    const DATES: &str = r#"{"from_date": "2024-05-01", "to_date": "2024-05-31"}"#;

    struct Setup {
        orchestrator: Orchestrator,
        store: Arc<InMemoryStateStore>,
        tracer: Arc<InMemoryTraceRecorder>,
        executor: Arc<ScriptedQueryExecutor>,
    }

    fn setup(llm: ScriptedLlmClient, executor: ScriptedQueryExecutor) -> Setup {
        let deps = fixtures::deps(llm, ScriptedQueryExecutor::new());
        let executor = Arc::new(executor);
        let deps = crate::infrastructure::workflow::steps::StepDeps {
            queries: QueryRunner::new(executor.clone(), 100),
            ..deps
        };

        let store = Arc::new(InMemoryStateStore::new(Duration::from_secs(1800)));
        let tracer = Arc::new(InMemoryTraceRecorder::new());
        let orchestrator = Orchestrator::new(
            StepRunner::new(tracer.clone()),
            default_registry(&deps),
            store.clone(),
            &deps,
            &WorkflowConfig::default(),
        )
        .unwrap();

        Setup {
            orchestrator,
            store,
            tracer,
            executor,
        }
    }

    fn request() -> RequestFields {
        RequestFields::new("How much did we spend in May?", "user-1", "company-1")
    }

    fn table_sql_llm(dates: &str, corrections: &[&str]) -> ScriptedLlmClient {
        let llm = ScriptedLlmClient::new()
            .with_reply("select_table", "trsc")
            .with_reply("extract_dates", dates)
            .with_reply("generate_query", "```sql\nSELECT SUM(out_amt) FROM trsc\n```")
            .with_reply("respond", "You spent 20 in May.")
            .with_reply("respond_no_data", "No spending found for May.");
        corrections
            .iter()
            .fold(llm, |llm, sql| llm.with_reply("correct_query", *sql))
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let s = setup(
            table_sql_llm(DATES, &["SELECT SUM(out_amt) AS total FROM trsc"]),
            ScriptedQueryExecutor::new().with_rows(fixtures::rows(2)),
        );

        let outcome = s
            .orchestrator
            .start(request(), Some(WorkflowFamily::TableSql))
            .await
            .unwrap();

        assert_eq!(outcome.status, WorkflowStatus::Completed);
        assert_eq!(outcome.answer.as_deref(), Some("You spent 20 in May."));
        assert_eq!(outcome.retry_count, 0);
        assert_eq!(
            s.tracer.final_answer(outcome.execution_id.as_str()).await.as_deref(),
            Some("You spent 20 in May.")
        );
    }

    #[tokio::test]
    async fn test_one_correction_then_success() {
        let s = setup(
            table_sql_llm(DATES, &["SELECT SUM(out_amt) AS total FROM trsc"]),
            ScriptedQueryExecutor::new()
                .with_count(2)
                .with_error("column \"amount\" does not exist")
                .with_rows(fixtures::rows(2)),
        );

        let outcome = s
            .orchestrator
            .start(request(), Some(WorkflowFamily::TableSql))
            .await
            .unwrap();

        assert_eq!(outcome.status, WorkflowStatus::Completed);
        assert_eq!(outcome.retry_count, 1);
        let ctx = s.orchestrator.status(&outcome.execution_id).await.unwrap();
        assert!(!ctx.flags.query_error);
        assert_eq!(
            s.executor.executed().last().map(String::as_str),
            Some("SELECT SUM(out_amt) AS total FROM trsc")
        );
    }

    #[tokio::test]
    async fn test_three_failures_end_without_respond() {
        let llm = table_sql_llm(DATES, &["SELECT 2", "SELECT 3"]);
        let s = setup(
            llm,
            ScriptedQueryExecutor::new()
                .with_count(2)
                .with_error("syntax error"),
        );

        let outcome = s
            .orchestrator
            .start(request(), Some(WorkflowFamily::TableSql))
            .await
            .unwrap();

        assert_eq!(outcome.status, WorkflowStatus::Failed);
        assert_eq!(outcome.answer.as_deref(), Some(messages::QUERY_FAILED));
        assert_eq!(outcome.retry_count, 3);
        assert_eq!(s.executor.executed().len(), 3);
    }

    #[tokio::test]
    async fn test_date_clarification_round_trip() {
        let s = setup(
            table_sql_llm("{}", &[]),
            ScriptedQueryExecutor::new().with_rows(fixtures::rows(2)),
        );

        let outcome = s
            .orchestrator
            .start(request(), Some(WorkflowFamily::TableSql))
            .await
            .unwrap();

        assert!(outcome.is_suspended());
        assert!(outcome.answer.is_none());
        assert_eq!(outcome.clarification, Some(ClarificationKind::DateRange));
        let stored = s.orchestrator.status(&outcome.execution_id).await.unwrap();
        assert!(stored.flags.awaiting_clarification);
        assert!(s.tracer.final_answer(outcome.execution_id.as_str()).await.is_none());

        let resumed = s
            .orchestrator
            .resume(
                &outcome.execution_id,
                &ClarificationInput::date_range("2024-05-01", "2024-05-31"),
            )
            .await
            .unwrap();

        assert_eq!(resumed.status, WorkflowStatus::Completed);
        assert_eq!(resumed.answer.as_deref(), Some("You spent 20 in May."));
        assert!(resumed.clarification.is_none());
    }

    #[tokio::test]
    async fn test_future_period_on_resume_is_rejected() {
        let s = setup(
            table_sql_llm("{}", &[]),
            ScriptedQueryExecutor::new().with_rows(fixtures::rows(2)),
        );
        let outcome = s
            .orchestrator
            .start(request(), Some(WorkflowFamily::TableSql))
            .await
            .unwrap();
        assert!(outcome.is_suspended());

        let err = s
            .orchestrator
            .resume(
                &outcome.execution_id,
                &ClarificationInput::date_range("2099-01-01", "2099-12-31"),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, WorkflowError::InvalidInput(_)));
        let stored = s.orchestrator.status(&outcome.execution_id).await.unwrap();
        assert!(stored.is_suspended());
        assert!(stored.progress.date_range.is_none());
        assert!(s.executor.executed().is_empty());

        let resumed = s
            .orchestrator
            .resume(
                &outcome.execution_id,
                &ClarificationInput::date_range("2024-05-01", "2024-05-31"),
            )
            .await
            .unwrap();
        assert_eq!(resumed.status, WorkflowStatus::Completed);
    }

    #[tokio::test]
    async fn test_future_end_on_resume_is_clamped() {
        let s = setup(
            table_sql_llm("{}", &[]),
            ScriptedQueryExecutor::new().with_rows(fixtures::rows(2)),
        );
        let outcome = s
            .orchestrator
            .start(request(), Some(WorkflowFamily::TableSql))
            .await
            .unwrap();

        let resumed = s
            .orchestrator
            .resume(
                &outcome.execution_id,
                &ClarificationInput::date_range("2024-06-01", "2099-12-31"),
            )
            .await
            .unwrap();

        assert_eq!(resumed.status, WorkflowStatus::Completed);
        let ctx = s.orchestrator.status(&outcome.execution_id).await.unwrap();
        assert_eq!(ctx.progress.date_range.unwrap().end, fixtures::today());
        assert!(ctx.flags.future_date_detected);
    }

    #[tokio::test]
    async fn test_next_page_walks_table_results() {
        let s = setup(
            table_sql_llm(DATES, &[]),
            ScriptedQueryExecutor::new()
                .with_count(250)
                .with_rows(fixtures::rows(100))
                .with_rows(fixtures::rows(101))
                .with_rows(fixtures::rows(50)),
        );
        let outcome = s
            .orchestrator
            .start(request(), Some(WorkflowFamily::TableSql))
            .await
            .unwrap();
        assert!(s.orchestrator.status(&outcome.execution_id).await.unwrap().progress.has_next);

        let second = s.orchestrator.next_page(&outcome.execution_id).await.unwrap();
        assert_eq!(second.page, 1);
        assert_eq!(second.rows.len(), 100);
        assert!(second.has_next);
        assert_eq!(
            s.executor.executed().last().map(String::as_str),
            Some("SELECT * FROM (SELECT SUM(out_amt) FROM trsc) AS page LIMIT 101 OFFSET 100")
        );

        let third = s.orchestrator.next_page(&outcome.execution_id).await.unwrap();
        assert_eq!(third.page, 2);
        assert_eq!(third.rows.len(), 50);
        assert!(!third.has_next);
        let ctx = s.orchestrator.status(&outcome.execution_id).await.unwrap();
        assert_eq!(ctx.progress.row_count, 50);

        let err = s.orchestrator.next_page(&outcome.execution_id).await.unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_next_page_pages_supervisor_records() {
        let s = setup(
            ScriptedLlmClient::new(),
            ScriptedQueryExecutor::new().with_rows(fixtures::rows(3)),
        );
        let mut ctx = ExecutionContext::new(
            request(),
            FamilyPayload::for_family(WorkflowFamily::Supervisor),
        );
        let mut paged = crate::domain::workflow::SubExecution::new(1, "A");
        paged.query = Some("SELECT a FROM trsc".to_string());
        paged.mark_completed(fixtures::rows(100), true);
        let mut whole = crate::domain::workflow::SubExecution::new(2, "B");
        whole.query = Some("SELECT b FROM amt".to_string());
        whole.mark_completed(fixtures::rows(1), false);
        ctx.supervisor_mut().unwrap().executions = vec![paged, whole];
        ctx.progress.has_next = true;
        ctx.complete("Here is what I found.");
        s.store.create(ctx.clone()).await.unwrap();

        let page = s.orchestrator.next_page(&ctx.execution_id).await.unwrap();

        assert_eq!(page.page, 1);
        assert_eq!(page.rows.len(), 3);
        assert!(!page.has_next);
        assert_eq!(
            s.executor.executed(),
            vec!["SELECT * FROM (SELECT a FROM trsc) AS page LIMIT 101 OFFSET 100"]
        );
        let stored = s.orchestrator.status(&ctx.execution_id).await.unwrap();
        let executions = &stored.supervisor().unwrap().executions;
        assert_eq!(executions[0].page, 1);
        assert!(!executions[0].has_next);
        assert_eq!(executions[1].rows.len(), 1);
    }

    #[tokio::test]
    async fn test_next_page_requires_more_rows() {
        let s = setup(
            table_sql_llm(DATES, &[]),
            ScriptedQueryExecutor::new().with_rows(fixtures::rows(2)),
        );
        let outcome = s
            .orchestrator
            .start(request(), Some(WorkflowFamily::TableSql))
            .await
            .unwrap();

        let err = s.orchestrator.next_page(&outcome.execution_id).await.unwrap_err();

        assert!(matches!(err, WorkflowError::InvalidInput(_)));
        assert_eq!(s.executor.executed().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_fields_fail_without_steps() {
        let llm = ScriptedLlmClient::new();
        let s = setup(llm, ScriptedQueryExecutor::new());

        let outcome = s
            .orchestrator
            .start(RequestFields::new("  ", "user-1", ""), None)
            .await
            .unwrap();

        assert_eq!(outcome.status, WorkflowStatus::Failed);
        assert_eq!(
            outcome.answer.as_deref(),
            Some(messages::missing_fields(&["question", "company_id"]).as_str())
        );
        assert!(s.store.get(&outcome.execution_id).await.is_ok());
        assert!(s.tracer.traces_for(outcome.execution_id.as_str()).await.is_empty());
    }

    #[tokio::test]
    async fn test_small_talk_routed_by_supervisor() {
        let llm = ScriptedLlmClient::new()
            .with_reply("classify_request", "no")
            .with_reply("small_talk", "Hello! Ask me about your accounts.");
        let s = setup(llm, ScriptedQueryExecutor::new());

        let outcome = s
            .orchestrator
            .start(RequestFields::new("Hi there", "user-1", "company-1"), None)
            .await
            .unwrap();

        assert_eq!(outcome.family, WorkflowFamily::Supervisor);
        assert_eq!(outcome.status, WorkflowStatus::Completed);
        assert_eq!(
            outcome.answer.as_deref(),
            Some("Hello! Ask me about your accounts.")
        );
    }

    #[tokio::test]
    async fn test_sub_execution_cannot_be_resumed_directly() {
        let s = setup(ScriptedLlmClient::new(), ScriptedQueryExecutor::new());
        let parent = ExecutionContext::new(
            request(),
            FamilyPayload::for_family(WorkflowFamily::Supervisor),
        );
        let mut sub = ExecutionContext::for_sub_execution(&parent, "A");
        sub.request_clarification(ClarificationKind::DateRange, "Which period?");
        s.store.create(sub.clone()).await.unwrap();

        let err = s
            .orchestrator
            .resume(&sub.execution_id, &ClarificationInput::date_range("20240501", "20240531"))
            .await
            .unwrap_err();

        assert!(matches!(err, WorkflowError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_status_and_remove() {
        let s = setup(
            table_sql_llm(DATES, &["SELECT SUM(out_amt) AS total FROM trsc"]),
            ScriptedQueryExecutor::new().with_rows(vec![]),
        );

        let outcome = s
            .orchestrator
            .start(request(), Some(WorkflowFamily::TableSql))
            .await
            .unwrap();
        assert_eq!(outcome.status, WorkflowStatus::NoData);

        let ctx = s.orchestrator.status(&outcome.execution_id).await.unwrap();
        assert_eq!(ctx.final_answer, outcome.answer);

        assert!(s.orchestrator.remove(&outcome.execution_id).await.unwrap());
        let err = s.orchestrator.status(&outcome.execution_id).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_resume_unknown_id_is_not_found() {
        let s = setup(ScriptedLlmClient::new(), ScriptedQueryExecutor::new());

        let err = s
            .orchestrator
            .resume(&ExecutionId::generate(), &ClarificationInput::text("more"))
            .await
            .unwrap_err();

        assert!(err.is_not_found());
    }
}

//! NLQ Orchestrator
//!
//! Workflow engine that answers natural-language questions about financial
//! data by chaining LLM-backed steps:
//! - Supervisor routing with question decomposition and aggregation
//! - Table-SQL, tool/API and semantic-query pipelines
//! - Bounded query correction loop
//! - Human-in-the-loop suspend and resume over an expiring state store

pub mod api;
pub mod cli;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use config::AppConfig;

use std::sync::Arc;

use tracing::{info, warn};

use api::state::AppState;
use domain::notify::Notifier;
use domain::query::QueryExecutor;
use domain::retrieval::{ExamplePair, NL2SQL_COLLECTION, SELECTOR_COLLECTION};
use domain::workflow::{ApiCatalog, TableCatalog};
use infrastructure::llm::{HttpClient, OpenAiLlmClient};
use infrastructure::notify::BroadcastNotifier;
use infrastructure::query::{PostgresQueryExecutor, UnconfiguredQueryExecutor};
use infrastructure::retrieval::InMemoryFewShotStore;
use infrastructure::state::InMemoryStateStore;
use infrastructure::trace::InMemoryTraceRecorder;
use infrastructure::workflow::steps::{default_registry, Clock, StepDeps};
use infrastructure::workflow::{Orchestrator, QueryRunner, StepRunner};

/// Wire every collaborator from configuration and build the orchestrator.
/// Step progress goes to `notifier` for requests that carry a channel.
pub async fn build_orchestrator(
    config: &AppConfig,
    notifier: Option<Arc<dyn Notifier>>,
) -> anyhow::Result<Orchestrator> {
    let http = HttpClient::with_timeout(config.llm.timeout())?;
    if config.llm.api_key.is_empty() {
        warn!("No LLM API key configured; set APP__LLM__API_KEY");
    }
    info!(base_url = %config.llm.base_url, model = %config.llm.model, "Using OpenAI-compatible LLM endpoint");
    let llm = Arc::new(OpenAiLlmClient::with_base_url(
        http,
        config.llm.api_key.clone(),
        config.llm.model.clone(),
        config.llm.base_url.clone(),
    ));

    let executor: Arc<dyn QueryExecutor> = match config.database.url.as_deref() {
        Some(url) => {
            info!("Using PostgreSQL query executor");
            Arc::new(PostgresQueryExecutor::connect_lazy(url, &config.database)?)
        }
        None => {
            warn!("No database configured; query steps will fail");
            Arc::new(UnconfiguredQueryExecutor)
        }
    };
    let queries = QueryRunner::new(executor, config.workflow.page_size);

    let few_shots = Arc::new(InMemoryFewShotStore::new());
    few_shots.extend(SELECTOR_COLLECTION, default_selector_examples()).await;
    few_shots.extend(NL2SQL_COLLECTION, default_sql_examples()).await;

    let deps = StepDeps {
        llm,
        few_shots,
        queries,
        tables: Arc::new(TableCatalog::default()),
        apis: Arc::new(ApiCatalog::default()),
        clock: Clock::system(),
    };

    let mut runner = StepRunner::new(Arc::new(InMemoryTraceRecorder::new()));
    if let Some(notifier) = notifier {
        runner = runner.with_notifier(notifier);
    }
    let store = Arc::new(InMemoryStateStore::new(config.workflow.state_ttl()));

    let orchestrator = Orchestrator::new(
        runner,
        default_registry(&deps),
        store,
        &deps,
        &config.workflow,
    )?;

    info!(
        ttl_secs = config.workflow.state_ttl_secs,
        max_query_attempts = config.workflow.max_query_attempts,
        "Orchestrator ready"
    );
    Ok(orchestrator)
}

/// Application state for the HTTP server. Step events are published on a
/// broadcast channel that `/v1/channels/{channel}/events` subscribes to.
pub async fn create_app_state(config: &AppConfig) -> anyhow::Result<AppState> {
    let notifier = Arc::new(BroadcastNotifier::new());
    let events: Arc<dyn Notifier> = notifier.clone();
    let orchestrator = build_orchestrator(config, Some(events)).await?;
    Ok(AppState::new(Arc::new(orchestrator), notifier))
}

fn default_selector_examples() -> Vec<ExamplePair> {
    vec![
        ExamplePair::new("What is the balance of my accounts today?", "amt"),
        ExamplePair::new("How much money was withdrawn last month?", "trsc"),
        ExamplePair::new("Show deposits into the operating account in March", "trsc"),
    ]
}

fn default_sql_examples() -> Vec<ExamplePair> {
    vec![
        ExamplePair::new(
            "What was the total balance at the end of May 2024?",
            "SELECT SUM(acct_bal_amt) FROM amt WHERE com_id = '{company}' AND reg_dt = '20240531'",
        ),
        ExamplePair::new(
            "How much did we withdraw in April 2024?",
            "SELECT SUM(out_amt) FROM trsc WHERE com_id = '{company}' \
             AND trsc_dt BETWEEN '20240401' AND '20240430'",
        ),
    ]
}

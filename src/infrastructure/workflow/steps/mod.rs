//! Step implementations and the default registry

mod dates;
mod respond;
mod semantic;
mod supervisor;
mod table_sql;
mod tool_use;

use std::sync::Arc;

use tracing::warn;

use super::query_runner::QueryRunner;
use crate::domain::llm::LlmClient;
use crate::domain::retrieval::{ExamplePair, FewShotSearch};
use crate::domain::workflow::{ApiCatalog, StepRegistry, TableCatalog};

pub use dates::{check_dates, merge_clarification, Clock, DateCheck, DateExtractionStep};
pub use respond::{RespondNoDataStep, RespondStep};
pub use semantic::{
    render_sql, DslToSqlStep, ExtractFilterStep, ExtractMetricsStep, ManipulateStep,
};
pub use supervisor::{ClassifyRequestStep, PostProcessStep, SmallTalkStep, SplitQuestionStep};
pub use table_sql::{CorrectQueryStep, ExecuteQueryStep, GenerateQueryStep, SelectTableStep};
pub use tool_use::{ExtractParamsStep, InvokeApiStep, ResolvePeriodStep, SelectApiStep};

/// Examples fetched per few-shot search
const FEW_SHOT_TOP_K: usize = 3;

/// Collaborators shared by the step implementations
#[derive(Debug, Clone)]
pub struct StepDeps {
    pub llm: Arc<dyn LlmClient>,
    pub few_shots: Arc<dyn FewShotSearch>,
    pub queries: QueryRunner,
    pub tables: Arc<TableCatalog>,
    pub apis: Arc<ApiCatalog>,
    pub clock: Clock,
}

/// Registry with one implementation for every step kind
pub fn default_registry(deps: &StepDeps) -> StepRegistry {
    StepRegistry::new()
        .with_step(Arc::new(ClassifyRequestStep::new(deps)))
        .with_step(Arc::new(SplitQuestionStep::new(deps)))
        .with_step(Arc::new(PostProcessStep))
        .with_step(Arc::new(SmallTalkStep::new(deps)))
        .with_step(Arc::new(SelectTableStep::new(deps)))
        .with_step(Arc::new(DateExtractionStep::extract_dates(deps)))
        .with_step(Arc::new(GenerateQueryStep::new(deps)))
        .with_step(Arc::new(ExecuteQueryStep::new(deps)))
        .with_step(Arc::new(CorrectQueryStep::new(deps)))
        .with_step(Arc::new(SelectApiStep::new(deps)))
        .with_step(Arc::new(ExtractParamsStep::new(deps)))
        .with_step(Arc::new(ResolvePeriodStep::new(deps)))
        .with_step(Arc::new(InvokeApiStep::new(deps)))
        .with_step(Arc::new(DateExtractionStep::check_dates(deps)))
        .with_step(Arc::new(ExtractMetricsStep::new(deps)))
        .with_step(Arc::new(ExtractFilterStep::new(deps)))
        .with_step(Arc::new(ManipulateStep::new(deps)))
        .with_step(Arc::new(DslToSqlStep::new(deps)))
        .with_step(Arc::new(RespondStep::new(deps)))
        .with_step(Arc::new(RespondNoDataStep::new(deps)))
}

/// Few-shot examples for `question`; retrieval failures yield none
async fn few_shots(search: &dyn FewShotSearch, question: &str, collection: &str) -> Vec<ExamplePair> {
    match search.search(question, collection, FEW_SHOT_TOP_K).await {
        Ok(examples) => examples,
        Err(e) => {
            warn!(collection = collection, error = %e, "Few-shot search failed; continuing without examples");
            Vec::new()
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::domain::llm::ScriptedLlmClient;
    use crate::domain::query::ScriptedQueryExecutor;
    use crate::domain::retrieval::mock::StaticFewShotSearch;
    use crate::domain::workflow::{ExecutionContext, FamilyPayload, RequestFields, Row};
    use chrono::NaiveDate;
    use serde_json::json;

    pub fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
    }

    pub fn deps(llm: ScriptedLlmClient, executor: ScriptedQueryExecutor) -> StepDeps {
        StepDeps {
            llm: Arc::new(llm),
            few_shots: Arc::new(StaticFewShotSearch::new(vec![])),
            queries: QueryRunner::new(Arc::new(executor), 100),
            tables: Arc::new(TableCatalog::default()),
            apis: Arc::new(ApiCatalog::default()),
            clock: Clock::fixed(today()),
        }
    }

    pub fn context(payload: FamilyPayload) -> ExecutionContext {
        ExecutionContext::new(
            RequestFields::new("How much did we spend in May?", "user-1", "company-1"),
            payload,
        )
    }

    pub fn rows(n: usize) -> Vec<Row> {
        (0..n)
            .map(|i| {
                let mut row = Row::new();
                row.insert("amount".to_string(), json!(i * 10));
                row
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::llm::ScriptedLlmClient;
    use crate::domain::query::ScriptedQueryExecutor;
    use crate::domain::retrieval::mock::StaticFewShotSearch;
    use crate::domain::workflow::StepKind;

    #[test]
    fn test_default_registry_covers_every_kind() {
        let registry = default_registry(&fixtures::deps(
            ScriptedLlmClient::new(),
            ScriptedQueryExecutor::new(),
        ));

        assert_eq!(registry.len(), 20);
        assert!(registry
            .validate(&[
                StepKind::ClassifyRequest,
                StepKind::CheckDates,
                StepKind::ExtractDates,
                StepKind::RespondNoData,
            ])
            .is_ok());
    }

    #[tokio::test]
    async fn test_failed_few_shot_search_yields_nothing() {
        let search = StaticFewShotSearch::failing("vector store down");
        assert!(few_shots(&search, "q", "nl2sql").await.is_empty());
    }
}

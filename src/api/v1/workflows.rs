//! Workflow endpoints: start, resume, page, inspect and remove instances

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::api::state::AppState;
use crate::api::types::{ApiError, Json};
use crate::domain::workflow::{
    ClarificationInput, ExecutionId, RequestFields, ResultPage, WorkflowFamily, WorkflowOutcome,
};

/// Body of `POST /v1/workflows`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartWorkflowRequest {
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub company_id: String,
    /// Route straight to this family instead of the supervisor
    #[serde(default)]
    pub family: Option<WorkflowFamily>,
    /// Handle for step progress notifications
    #[serde(default)]
    pub channel: Option<String>,
}

impl StartWorkflowRequest {
    fn into_parts(self) -> (RequestFields, Option<WorkflowFamily>) {
        let mut fields = RequestFields::new(self.question, self.user_id, self.company_id);
        if let Some(channel) = self.channel {
            fields = fields.with_channel(channel);
        }
        (fields, self.family)
    }
}

fn parse_id(raw: String) -> Result<ExecutionId, ApiError> {
    ExecutionId::new(raw).map_err(|e| ApiError::from(e).with_param("execution_id"))
}

/// POST /v1/workflows
pub async fn start_workflow(
    State(state): State<AppState>,
    Json(request): Json<StartWorkflowRequest>,
) -> Result<Json<WorkflowOutcome>, ApiError> {
    debug!(user_id = %request.user_id, family = ?request.family, "Starting workflow");

    let (fields, family) = request.into_parts();
    let outcome = state.orchestrator.start(fields, family).await?;

    info!(
        execution_id = %outcome.execution_id,
        status = %outcome.status,
        "Workflow request handled"
    );
    Ok(Json(outcome))
}

/// POST /v1/workflows/{execution_id}/resume
pub async fn resume_workflow(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
    Json(input): Json<ClarificationInput>,
) -> Result<Json<WorkflowOutcome>, ApiError> {
    let id = parse_id(execution_id)?;
    debug!(execution_id = %id, "Resuming workflow");

    let outcome = state.orchestrator.resume(&id, &input).await?;
    Ok(Json(outcome))
}

/// POST /v1/workflows/{execution_id}/next_page
pub async fn next_page(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
) -> Result<Json<ResultPage>, ApiError> {
    let id = parse_id(execution_id)?;
    debug!(execution_id = %id, "Fetching next result page");

    let page = state.orchestrator.next_page(&id).await?;
    info!(
        execution_id = %id,
        page = page.page,
        rows = page.rows.len(),
        has_next = page.has_next,
        "Result page served"
    );
    Ok(Json(page))
}

/// GET /v1/workflows/{execution_id}
pub async fn get_workflow(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
) -> Result<Response, ApiError> {
    let id = parse_id(execution_id)?;
    let ctx = state.orchestrator.status(&id).await?;
    Ok(Json(ctx).into_response())
}

/// DELETE /v1/workflows/{execution_id}
pub async fn delete_workflow(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_id(execution_id)?;

    if state.orchestrator.remove(&id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!("Workflow instance not found: {}", id))
            .with_param("execution_id"))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::api::{create_router, AppState};
    use crate::config::WorkflowConfig;
    use crate::domain::llm::ScriptedLlmClient;
    use crate::domain::query::ScriptedQueryExecutor;
    use crate::infrastructure::notify::BroadcastNotifier;
    use crate::infrastructure::state::InMemoryStateStore;
    use crate::infrastructure::trace::InMemoryTraceRecorder;
    use crate::infrastructure::workflow::steps::{default_registry, fixtures};
    use crate::infrastructure::workflow::{Orchestrator, StepRunner};

    fn app(llm: ScriptedLlmClient, executor: ScriptedQueryExecutor) -> Router {
        let deps = fixtures::deps(llm, executor);
        let orchestrator = Orchestrator::new(
            StepRunner::new(Arc::new(InMemoryTraceRecorder::new())),
            default_registry(&deps),
            Arc::new(InMemoryStateStore::new(std::time::Duration::from_secs(1800))),
            &deps,
            &WorkflowConfig::default(),
        )
        .unwrap();

        create_router(AppState::new(
            Arc::new(orchestrator),
            Arc::new(BroadcastNotifier::new()),
        ))
    }

    fn table_sql_llm(dates: &str) -> ScriptedLlmClient {
        ScriptedLlmClient::new()
            .with_reply("select_table", "trsc")
            .with_reply("extract_dates", dates)
            .with_reply("generate_query", "SELECT SUM(out_amt) FROM trsc")
            .with_reply("respond", "You spent 20 in May.")
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 1_000_000)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    fn start_body() -> Value {
        json!({
            "question": "How much did we spend in May?",
            "user_id": "user-1",
            "company_id": "company-1",
            "family": "table_sql"
        })
    }

    #[tokio::test]
    async fn test_health() {
        let app = app(ScriptedLlmClient::new(), ScriptedQueryExecutor::new());

        let (status, body) = send(&app, "GET", "/health", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_start_completes() {
        let app = app(
            table_sql_llm(r#"{"from_date": "2024-05-01", "to_date": "2024-05-31"}"#),
            ScriptedQueryExecutor::new().with_rows(fixtures::rows(2)),
        );

        let (status, body) = send(&app, "POST", "/v1/workflows", Some(start_body())).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "completed");
        assert_eq!(body["answer"], "You spent 20 in May.");
        assert!(body.get("clarification").is_none());

        let id = body["execution_id"].as_str().unwrap();
        let (status, stored) = send(&app, "GET", &format!("/v1/workflows/{}", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stored["final_answer"], "You spent 20 in May.");
    }

    #[tokio::test]
    async fn test_suspend_and_resume() {
        let app = app(
            table_sql_llm("{}"),
            ScriptedQueryExecutor::new().with_rows(fixtures::rows(2)),
        );

        let (_, body) = send(&app, "POST", "/v1/workflows", Some(start_body())).await;
        assert_eq!(body["status"], "suspended");
        assert_eq!(body["clarification"], "date_clarification");
        assert!(body.get("answer").is_none());

        let id = body["execution_id"].as_str().unwrap().to_string();
        let (status, resumed) = send(
            &app,
            "POST",
            &format!("/v1/workflows/{}/resume", id),
            Some(json!({"from_date": "2024-05-01", "to_date": "2024-05-31"})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(resumed["status"], "completed");

        let (status, body) = send(
            &app,
            "POST",
            &format!("/v1/workflows/{}/resume", id),
            Some(json!({"from_date": "2024-05-01", "to_date": "2024-05-31"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "not_awaiting_clarification");
    }

    #[tokio::test]
    async fn test_unknown_instance_is_404() {
        let app = app(ScriptedLlmClient::new(), ScriptedQueryExecutor::new());

        let (status, body) = send(&app, "GET", "/v1/workflows/does-not-exist", None).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["type"], "not_found_error");

        let (status, _) = send(&app, "DELETE", "/v1/workflows/does-not-exist", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_missing_fields_answer_with_apology() {
        let app = app(ScriptedLlmClient::new(), ScriptedQueryExecutor::new());

        let (status, body) = send(
            &app,
            "POST",
            "/v1/workflows",
            Some(json!({"question": "How much?", "user_id": "user-1"})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "failed");
        assert!(body["answer"].as_str().unwrap().contains("company_id"));
    }

    #[tokio::test]
    async fn test_malformed_body_is_json_error() {
        let app = app(ScriptedLlmClient::new(), ScriptedQueryExecutor::new());

        let (status, body) = send(
            &app,
            "POST",
            "/v1/workflows",
            Some(json!({"question": 42})),
        )
        .await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"]["code"], "json_parse_error");
    }

    #[tokio::test]
    async fn test_delete_removes_instance() {
        let app = app(ScriptedLlmClient::new(), ScriptedQueryExecutor::new());
        let (_, body) = send(
            &app,
            "POST",
            "/v1/workflows",
            Some(json!({"question": "", "user_id": "u", "company_id": "c"})),
        )
        .await;
        let id = body["execution_id"].as_str().unwrap().to_string();

        let (status, _) = send(&app, "DELETE", &format!("/v1/workflows/{}", id), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = send(&app, "GET", &format!("/v1/workflows/{}", id), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_next_page_serves_following_rows() {
        let app = app(
            table_sql_llm(r#"{"from_date": "2024-05-01", "to_date": "2024-05-31"}"#),
            ScriptedQueryExecutor::new()
                .with_count(150)
                .with_rows(fixtures::rows(100))
                .with_rows(fixtures::rows(50)),
        );
        let (_, body) = send(&app, "POST", "/v1/workflows", Some(start_body())).await;
        let id = body["execution_id"].as_str().unwrap().to_string();

        let uri = format!("/v1/workflows/{}/next_page", id);
        let (status, body) = send(&app, "POST", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["execution_id"], id.as_str());
        assert_eq!(body["page"], 1);
        assert_eq!(body["rows"].as_array().unwrap().len(), 50);
        assert_eq!(body["has_next"], false);

        let (status, body) = send(&app, "POST", &uri, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"]["message"].as_str().unwrap().contains("no further page"));
    }
}

//! v1 API endpoints

pub mod channels;
pub mod workflows;

use axum::{
    routing::{get, post},
    Router,
};

use super::state::AppState;

/// Create v1 API router
pub fn create_v1_router() -> Router<AppState> {
    Router::new()
        .route("/workflows", post(workflows::start_workflow))
        .route(
            "/workflows/{execution_id}",
            get(workflows::get_workflow).delete(workflows::delete_workflow),
        )
        .route(
            "/workflows/{execution_id}/resume",
            post(workflows::resume_workflow),
        )
        .route(
            "/workflows/{execution_id}/next_page",
            post(workflows::next_page),
        )
        .route("/channels/{channel}/events", get(channels::channel_events))
}

//! Infrastructure layer - Collaborator implementations and the orchestration engine

pub mod llm;
pub mod logging;
pub mod notify;
pub mod query;
pub mod retrieval;
pub mod state;
pub mod trace;
pub mod workflow;

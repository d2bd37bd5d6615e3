//! Few-shot example retrieval

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

use crate::domain::DomainError;

/// Collection of question-to-SQL examples used when generating queries
pub const NL2SQL_COLLECTION: &str = "nl2sql";

/// Collection of question-to-target examples used when selecting a table or API
pub const SELECTOR_COLLECTION: &str = "shots_selector";

/// A worked example shown to the model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExamplePair {
    pub question: String,
    pub answer: String,
}

impl ExamplePair {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
        }
    }
}

/// Similarity search over stored examples
#[async_trait]
pub trait FewShotSearch: Send + Sync + Debug {
    async fn search(
        &self,
        query: &str,
        collection: &str,
        top_k: usize,
    ) -> Result<Vec<ExamplePair>, DomainError>;
}

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::retrieval::{ExamplePair, FewShotSearch};
use crate::domain::DomainError;

/// Example collections ranked by word overlap with the query
#[derive(Debug, Default)]
pub struct InMemoryFewShotStore {
    collections: Arc<RwLock<HashMap<String, Vec<ExamplePair>>>>,
}

impl InMemoryFewShotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, collection: impl Into<String>, example: ExamplePair) {
        self.collections
            .write()
            .await
            .entry(collection.into())
            .or_default()
            .push(example);
    }

    pub async fn extend(&self, collection: impl Into<String>, examples: Vec<ExamplePair>) {
        self.collections
            .write()
            .await
            .entry(collection.into())
            .or_default()
            .extend(examples);
    }
}

fn tokens(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

#[async_trait]
impl FewShotSearch for InMemoryFewShotStore {
    async fn search(
        &self,
        query: &str,
        collection: &str,
        top_k: usize,
    ) -> Result<Vec<ExamplePair>, DomainError> {
        let collections = self.collections.read().await;
        let Some(examples) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let query_tokens = tokens(query);
        let mut scored: Vec<(usize, usize, &ExamplePair)> = examples
            .iter()
            .enumerate()
            .map(|(index, example)| {
                let overlap = tokens(&example.question).intersection(&query_tokens).count();
                (overlap, index, example)
            })
            .collect();

        // Highest overlap first, insertion order breaks ties
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(_, _, example)| example.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_search_ranks_by_overlap() {
        let store = InMemoryFewShotStore::new();
        store
            .extend(
                "nl2sql",
                vec![
                    ExamplePair::new("list all accounts", "SELECT * FROM amt"),
                    ExamplePair::new("total withdrawals last month", "SELECT SUM(out_amt) FROM trsc"),
                    ExamplePair::new("withdrawals by account", "SELECT acct_no, SUM(out_amt) FROM trsc"),
                ],
            )
            .await;

        let results = store
            .search("Total withdrawals by account", "nl2sql", 2)
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].question, "withdrawals by account");
        assert_eq!(results[1].question, "total withdrawals last month");
    }

    #[tokio::test]
    async fn test_unknown_collection_is_empty() {
        let store = InMemoryFewShotStore::new();
        store.add("nl2sql", ExamplePair::new("q", "a")).await;

        assert!(store.search("q", "shots_selector", 3).await.unwrap().is_empty());
    }
}

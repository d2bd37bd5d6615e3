use async_trait::async_trait;
use std::fmt::Debug;

use crate::domain::workflow::Row;
use crate::domain::DomainError;

/// Runs generated SQL against the target store
#[async_trait]
pub trait QueryExecutor: Send + Sync + Debug {
    /// Execute `query` and return its rows in order
    async fn execute(&self, query: &str) -> Result<Vec<Row>, DomainError>;

    /// Count the rows `query` yields, stopping once the count exceeds `limit`
    async fn count_rows(&self, query: &str, limit: usize) -> Result<usize, DomainError>;
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Executor double replaying scripted results in call order.
    ///
    /// When the script runs out, the last result repeats. `count_rows`
    /// returns the configured count, or the row count of the next result.
    #[derive(Debug, Default)]
    pub struct ScriptedQueryExecutor {
        results: Mutex<VecDeque<Result<Vec<Row>, String>>>,
        count: Mutex<Option<usize>>,
        executed: Mutex<Vec<String>>,
    }

    impl ScriptedQueryExecutor {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_rows(self, rows: Vec<Row>) -> Self {
            self.results.lock().unwrap().push_back(Ok(rows));
            self
        }

        pub fn with_error(self, error: impl Into<String>) -> Self {
            self.results.lock().unwrap().push_back(Err(error.into()));
            self
        }

        pub fn with_count(self, count: usize) -> Self {
            *self.count.lock().unwrap() = Some(count);
            self
        }

        /// Queries passed to `execute`, in call order
        pub fn executed(&self) -> Vec<String> {
            self.executed.lock().unwrap().clone()
        }

        fn next_result(&self) -> Option<Result<Vec<Row>, String>> {
            let mut results = self.results.lock().unwrap();
            if results.len() > 1 {
                results.pop_front()
            } else {
                results.front().cloned()
            }
        }
    }

    #[async_trait]
    impl QueryExecutor for ScriptedQueryExecutor {
        async fn execute(&self, query: &str) -> Result<Vec<Row>, DomainError> {
            self.executed.lock().unwrap().push(query.to_string());

            match self.next_result() {
                Some(Ok(rows)) => Ok(rows),
                Some(Err(error)) => Err(DomainError::query(error)),
                None => Ok(Vec::new()),
            }
        }

        async fn count_rows(&self, _query: &str, limit: usize) -> Result<usize, DomainError> {
            if let Some(count) = *self.count.lock().unwrap() {
                return Ok(count.min(limit + 1));
            }

            let results = self.results.lock().unwrap();
            match results.front() {
                Some(Ok(rows)) => Ok(rows.len().min(limit + 1)),
                Some(Err(error)) => Err(DomainError::query(error.clone())),
                None => Ok(0),
            }
        }
    }
}

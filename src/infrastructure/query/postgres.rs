//! PostgreSQL query executor

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row as _;
use tracing::debug;

use crate::config::DatabaseConfig;
use crate::domain::query::QueryExecutor;
use crate::domain::workflow::Row;
use crate::domain::DomainError;

/// Executes generated SQL on a Postgres pool.
///
/// Each row is materialized with `row_to_json`, so column order and JSON
/// types come straight from the database.
pub struct PostgresQueryExecutor {
    pool: PgPool,
}

impl std::fmt::Debug for PostgresQueryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresQueryExecutor")
            .field("pool_size", &self.pool.size())
            .finish()
    }
}

impl PostgresQueryExecutor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Build a pool that connects on first use
    pub fn connect_lazy(url: &str, config: &DatabaseConfig) -> Result<Self, DomainError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect_lazy(url)
            .map_err(|e| DomainError::configuration(format!("Invalid database URL: {}", e)))?;

        Ok(Self::new(pool))
    }
}

fn inner_query(query: &str) -> &str {
    query.trim().trim_end_matches(';').trim()
}

fn map_sqlx_error(err: sqlx::Error) -> DomainError {
    match err {
        sqlx::Error::Database(db) => DomainError::query(db.message().to_string()),
        other => DomainError::storage(format!("Database error: {}", other)),
    }
}

#[async_trait]
impl QueryExecutor for PostgresQueryExecutor {
    async fn execute(&self, query: &str) -> Result<Vec<Row>, DomainError> {
        let sql = format!(
            "SELECT row_to_json(q) AS row FROM ({}) AS q",
            inner_query(query)
        );
        debug!(query = %query, "Executing query");

        let records = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        records
            .into_iter()
            .map(|record| {
                let value: Value = record.try_get("row").map_err(map_sqlx_error)?;
                match value {
                    Value::Object(map) => Ok(map),
                    other => Err(DomainError::internal(format!(
                        "Expected a JSON object per row, got {}",
                        other
                    ))),
                }
            })
            .collect()
    }

    async fn count_rows(&self, query: &str, limit: usize) -> Result<usize, DomainError> {
        let sql = format!(
            "SELECT COUNT(*) AS total FROM (SELECT 1 FROM ({}) AS q LIMIT {}) AS c",
            inner_query(query),
            limit + 1
        );

        let record = sqlx::query(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        let total: i64 = record.try_get("total").map_err(map_sqlx_error)?;
        Ok(usize::try_from(total).unwrap_or(0))
    }
}

/// Executor used when no database is configured; every call fails
#[derive(Debug, Default)]
pub struct UnconfiguredQueryExecutor;

#[async_trait]
impl QueryExecutor for UnconfiguredQueryExecutor {
    async fn execute(&self, _query: &str) -> Result<Vec<Row>, DomainError> {
        Err(DomainError::configuration("No database configured"))
    }

    async fn count_rows(&self, _query: &str, _limit: usize) -> Result<usize, DomainError> {
        Err(DomainError::configuration("No database configured"))
    }
}

//! Query executor implementations

mod postgres;

pub use postgres::{PostgresQueryExecutor, UnconfiguredQueryExecutor};

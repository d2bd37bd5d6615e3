//! Query execution collaborator and SQL text helpers

mod executor;
pub mod sql;

pub use executor::QueryExecutor;

#[cfg(test)]
pub use executor::mock::ScriptedQueryExecutor;

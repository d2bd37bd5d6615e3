//! State store trait for in-flight execution contexts

use async_trait::async_trait;

use super::context::{ExecutionContext, ExecutionId};
use super::error::WorkflowError;

/// Mutation applied by [`StateStore::update`]
pub type ContextUpdate =
    Box<dyn FnOnce(&mut ExecutionContext) -> Result<(), WorkflowError> + Send>;

/// Keyed, expiring store of execution contexts.
///
/// Every successful read or write refreshes the entry's last-touched time.
/// Reads of missing or expired keys fail with `WorkflowError::NotFound`.
#[async_trait]
pub trait StateStore: Send + Sync + std::fmt::Debug {
    /// Insert a new context; fails if the ID is already present
    async fn create(&self, ctx: ExecutionContext) -> Result<(), WorkflowError>;

    async fn get(&self, id: &ExecutionId) -> Result<ExecutionContext, WorkflowError>;

    /// Replace a live context. Removed or expired contexts are not
    /// re-inserted; `create` is the only way in.
    async fn put(&self, ctx: ExecutionContext) -> Result<(), WorkflowError>;

    /// Atomic read-modify-write of one entry. The stored context is replaced
    /// only when `f` succeeds; the updated context is returned.
    async fn update(
        &self,
        id: &ExecutionId,
        f: ContextUpdate,
    ) -> Result<ExecutionContext, WorkflowError>;

    /// Remove an entry, returning whether it existed
    async fn remove(&self, id: &ExecutionId) -> Result<bool, WorkflowError>;

    /// Evict every entry untouched for longer than the TTL
    async fn sweep(&self) -> usize;

    async fn len(&self) -> usize;
}

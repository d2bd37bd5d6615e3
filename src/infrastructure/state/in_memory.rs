//! In-memory state store with idle-time expiry

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::domain::workflow::{
    ContextUpdate, ExecutionContext, ExecutionId, StateStore, WorkflowError,
};

#[derive(Debug)]
struct Entry {
    ctx: ExecutionContext,
    last_touched: Instant,
    /// Set when the sweep or `remove` dropped this entry from the map
    evicted: bool,
}

impl Entry {
    fn new(ctx: ExecutionContext) -> Self {
        Self {
            ctx,
            last_touched: Instant::now(),
            evicted: false,
        }
    }

    fn is_live(&self, ttl: Duration) -> bool {
        !self.evicted && self.last_touched.elapsed() <= ttl
    }

    fn touch(&mut self) {
        self.last_touched = Instant::now();
    }
}

type SharedEntry = Arc<Mutex<Entry>>;

/// State store backed by a map of individually locked entries.
///
/// The map lock is held only to find, insert or remove entries; reads and
/// writes of a context serialize on that entry's own lock, so different
/// executions never contend with each other.
#[derive(Debug)]
pub struct InMemoryStateStore {
    entries: Arc<RwLock<HashMap<String, SharedEntry>>>,
    ttl: Duration,
}

impl InMemoryStateStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    async fn entry(&self, id: &str) -> Option<SharedEntry> {
        self.entries.read().await.get(id).cloned()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn create(&self, ctx: ExecutionContext) -> Result<(), WorkflowError> {
        let key = ctx.execution_id.as_str().to_string();
        let mut entries = self.entries.write().await;

        if let Some(existing) = entries.get(&key) {
            if existing.lock().await.is_live(self.ttl) {
                return Err(WorkflowError::already_exists(key));
            }
        }

        entries.insert(key, Arc::new(Mutex::new(Entry::new(ctx))));
        Ok(())
    }

    async fn get(&self, id: &ExecutionId) -> Result<ExecutionContext, WorkflowError> {
        let entry = self
            .entry(id.as_str())
            .await
            .ok_or_else(|| WorkflowError::not_found(id.as_str()))?;

        let mut guard = entry.lock().await;
        if !guard.is_live(self.ttl) {
            return Err(WorkflowError::not_found(id.as_str()));
        }

        guard.touch();
        Ok(guard.ctx.clone())
    }

    async fn put(&self, ctx: ExecutionContext) -> Result<(), WorkflowError> {
        let key = ctx.execution_id.as_str().to_string();
        let entry = self
            .entry(&key)
            .await
            .ok_or_else(|| WorkflowError::not_found(&key))?;

        let mut guard = entry.lock().await;
        if !guard.is_live(self.ttl) {
            warn!(execution_id = %key, "Dropping write to a removed or expired context");
            return Err(WorkflowError::not_found(&key));
        }

        guard.ctx = ctx;
        guard.touch();
        Ok(())
    }

    async fn update(
        &self,
        id: &ExecutionId,
        f: ContextUpdate,
    ) -> Result<ExecutionContext, WorkflowError> {
        let entry = self
            .entry(id.as_str())
            .await
            .ok_or_else(|| WorkflowError::not_found(id.as_str()))?;

        let mut guard = entry.lock().await;
        if !guard.is_live(self.ttl) {
            return Err(WorkflowError::not_found(id.as_str()));
        }

        let mut updated = guard.ctx.clone();
        f(&mut updated)?;

        guard.ctx = updated.clone();
        guard.touch();
        Ok(updated)
    }

    async fn remove(&self, id: &ExecutionId) -> Result<bool, WorkflowError> {
        let removed = self.entries.write().await.remove(id.as_str());

        match removed {
            Some(entry) => {
                entry.lock().await.evicted = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn sweep(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        let ttl = self.ttl;

        // Entries locked by a concurrent reader or writer are in use and stay
        entries.retain(|_, entry| match entry.try_lock() {
            Ok(mut guard) => {
                if guard.last_touched.elapsed() > ttl {
                    guard.evicted = true;
                    false
                } else {
                    true
                }
            }
            Err(_) => true,
        });

        let evicted = before - entries.len();
        if evicted > 0 {
            info!(evicted, remaining = entries.len(), "Evicted expired workflow contexts");
        } else {
            debug!(remaining = entries.len(), "State store sweep found nothing to evict");
        }
        evicted
    }

    async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

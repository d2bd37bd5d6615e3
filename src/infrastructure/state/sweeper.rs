use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::info;

use crate::domain::workflow::StateStore;

/// Run `store.sweep()` every `interval` until the returned handle is aborted
pub fn spawn_sweeper(store: Arc<dyn StateStore>, interval: Duration) -> JoinHandle<()> {
    info!(interval_secs = interval.as_secs(), "Starting state store sweeper");

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            store.sweep().await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::workflow::{ExecutionContext, FamilyPayload, RequestFields};
    use crate::infrastructure::state::InMemoryStateStore;

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_evicts_in_background() {
        let store = Arc::new(InMemoryStateStore::new(Duration::from_secs(60)));
        let ctx = ExecutionContext::new(
            RequestFields::new("q", "u", "c"),
            FamilyPayload::TableSql,
        );
        store.create(ctx).await.unwrap();

        let handle = spawn_sweeper(store.clone(), Duration::from_secs(10));

        tokio::time::sleep(Duration::from_secs(75)).await;
        assert_eq!(store.len().await, 0);

        handle.abort();
    }
}

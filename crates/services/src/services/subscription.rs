//! A mounted view of one remote collection

use std::sync::Arc;

use entities::Entity;
use remote::{Query, RemoteCollection};
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{
    cache::SharedCache,
    config::SyncConfig,
    error::SyncError,
    fetch_scheduler::{FetchOutcome, FetchScheduler},
    optimistic::{BatchReport, MutationCoordinator, MutationTicket, PendingMutation},
};

/// Owns the cache, scheduler and coordinator for one view and keeps them
/// alive while polling. Dropping it stops polling, discards in-flight fetch
/// results and abandons batch loops
///
/// Must be opened inside a tokio runtime
pub struct CollectionSubscription<T: Entity> {
    scheduler: FetchScheduler<T>,
    coordinator: MutationCoordinator<T>,
    config: SyncConfig,
    cancel: CancellationToken,
}

impl<T: Entity> CollectionSubscription<T> {
    pub fn open(remote: Arc<dyn RemoteCollection<T>>, query: Query, config: SyncConfig) -> Self {
        Self::open_with_token(remote, query, config, CancellationToken::new())
    }

    /// Open under an existing token, e.g. a child of a session-wide token
    pub fn open_with_token(
        remote: Arc<dyn RemoteCollection<T>>,
        query: Query,
        config: SyncConfig,
        cancel: CancellationToken,
    ) -> Self {
        let cache = Arc::new(SharedCache::new());
        let scheduler = FetchScheduler::new(
            Arc::clone(&remote),
            query,
            cache,
            &config,
            cancel.clone(),
        );
        let coordinator = MutationCoordinator::new(scheduler.clone(), remote, &config, cancel.clone());
        scheduler.start_polling(config.poll_interval());

        info!(
            collection = T::NAME,
            poll_interval_ms = config.poll_interval_ms,
            "Collection subscription opened"
        );
        Self {
            scheduler,
            coordinator,
            config,
            cancel,
        }
    }

    pub fn cache(&self) -> &Arc<SharedCache<T>> {
        self.scheduler.cache()
    }

    pub fn scheduler(&self) -> &FetchScheduler<T> {
        &self.scheduler
    }

    pub fn coordinator(&self) -> &MutationCoordinator<T> {
        &self.coordinator
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn items(&self) -> Vec<T> {
        self.cache().snapshot()
    }

    pub fn unread_count(&self) -> usize {
        self.cache().unread_count()
    }

    /// Receives the cache revision after every visible change
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.cache().subscribe()
    }

    /// User-triggered refresh; bypasses the minimum interval
    pub async fn refresh(&self) -> Result<FetchOutcome, SyncError> {
        self.scheduler.request_fetch(true).await
    }

    pub fn apply(&self, mutation: PendingMutation<T>) -> MutationTicket {
        self.coordinator.apply(mutation)
    }

    pub fn apply_batch(&self, mutations: Vec<PendingMutation<T>>) -> JoinHandle<BatchReport> {
        self.coordinator.apply_batch(mutations)
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn close(&self) {
        if !self.cancel.is_cancelled() {
            self.cancel.cancel();
            info!(collection = T::NAME, "Collection subscription closed");
        }
    }
}

impl<T: Entity> Drop for CollectionSubscription<T> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{TimeZone, Utc};
    use entities::models::project::{Project, ProjectStatus};
    use remote::memory::{InMemoryCollection, Operation};

    use super::*;
    use crate::services::{cache::Patch, optimistic::MutationOutcome};

    fn project(id: &str) -> Project {
        Project {
            id: id.to_string(),
            title: id.to_string(),
            owner_email: "ada@example.com".into(),
            collaborator_emails: vec![],
            status: ProjectStatus::InProgress,
            updated_date: Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap(),
        }
    }

    fn config() -> SyncConfig {
        SyncConfig {
            min_fetch_interval_ms: 1_000,
            poll_interval_ms: 5_000,
            ..SyncConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn opening_fetches_and_polls() {
        let remote = Arc::new(InMemoryCollection::with_items(vec![project("p1")]));
        let subscription = CollectionSubscription::<Project>::open(remote.clone(), Query::new(), config());
        let mut changes = subscription.changes();

        changes.changed().await.unwrap();
        assert_eq!(subscription.items(), vec![project("p1")]);

        remote.insert(project("p2"));
        tokio::time::sleep(Duration::from_millis(5_500)).await;
        assert_eq!(subscription.items().len(), 2);
        assert_eq!(remote.calls(Operation::Fetch), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_stops_polling() {
        let remote = Arc::new(InMemoryCollection::with_items(vec![project("p1")]));
        let subscription = CollectionSubscription::<Project>::open(remote.clone(), Query::new(), config());
        let scheduler = subscription.scheduler().clone();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(remote.calls(Operation::Fetch), 1);

        drop(subscription);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(remote.calls(Operation::Fetch), 1);
        assert_eq!(scheduler.request_fetch(true).await, Err(SyncError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn closing_a_parent_token_closes_children() {
        let session = CancellationToken::new();
        let remote = Arc::new(InMemoryCollection::with_items(vec![project("p1")]));
        let subscription = CollectionSubscription::<Project>::open_with_token(
            remote,
            Query::new(),
            config(),
            session.child_token(),
        );

        session.cancel();
        assert!(subscription.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn pending_write_is_delivered_after_the_view_closes() {
        let remote = Arc::new(InMemoryCollection::with_items(vec![project("p1")]));
        remote.set_latency(Operation::Update, Duration::from_secs(1));
        let subscription = CollectionSubscription::<Project>::open(remote.clone(), Query::new(), config());
        subscription.changes().changed().await.unwrap();

        let status = ProjectStatus::Archived;
        let ticket = subscription.apply(PendingMutation::update(
            "p1",
            Patch::update(|project: &mut Project| project.status = ProjectStatus::Archived),
            Project::status_fields(&status),
        ));
        drop(subscription);

        assert_eq!(
            ticket.outcome().await,
            MutationOutcome::Confirmed {
                canonical_id: Some("p1".into())
            }
        );
        assert_eq!(remote.get("p1").unwrap().status, ProjectStatus::Archived);
    }
}

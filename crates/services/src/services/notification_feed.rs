//! Notification bell and notifications page bindings

use std::sync::Arc;

use entities::models::notification::Notification;
use remote::{Query, RemoteCollection, SortKey};
use tokio::task::JoinHandle;
use tracing::debug;

use super::{
    cache::Patch,
    config::SyncConfig,
    error::SyncError,
    fetch_scheduler::FetchOutcome,
    optimistic::{BatchReport, MutationTicket, PendingMutation},
    subscription::CollectionSubscription,
};

pub const BELL_LIMIT: usize = 20;
pub const PAGE_LIMIT: usize = 100;

/// The current user's notifications, newest first
pub struct NotificationFeed {
    user_email: String,
    subscription: CollectionSubscription<Notification>,
}

impl NotificationFeed {
    pub fn open(
        remote: Arc<dyn RemoteCollection<Notification>>,
        user_email: &str,
        limit: usize,
        config: SyncConfig,
    ) -> Self {
        let query = Query::new()
            .filter(Notification::for_user(user_email))
            .sort(SortKey::desc("created_date"))
            .limit(limit);
        Self {
            user_email: user_email.to_string(),
            subscription: CollectionSubscription::open(remote, query, config),
        }
    }

    /// Dropdown in the header: short list, frequent polling
    pub fn bell(remote: Arc<dyn RemoteCollection<Notification>>, user_email: &str) -> Self {
        Self::open(remote, user_email, BELL_LIMIT, SyncConfig::notification_bell())
    }

    pub fn page(remote: Arc<dyn RemoteCollection<Notification>>, user_email: &str) -> Self {
        Self::open(remote, user_email, PAGE_LIMIT, SyncConfig::notifications_page())
    }

    pub fn user_email(&self) -> &str {
        &self.user_email
    }

    pub fn subscription(&self) -> &CollectionSubscription<Notification> {
        &self.subscription
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.subscription.items()
    }

    pub fn unread_count(&self) -> usize {
        self.subscription.unread_count()
    }

    pub async fn refresh(&self) -> Result<FetchOutcome, SyncError> {
        self.subscription.refresh().await
    }

    /// Returns `None` when the notification is not shown or already read
    pub fn mark_read(&self, id: &str) -> Option<MutationTicket> {
        let unread = self
            .subscription
            .cache()
            .read()
            .get(id)
            .is_some_and(|n| !n.read);
        if !unread {
            debug!(notification_id = id, "Skipping mark read");
            return None;
        }
        Some(self.subscription.apply(mark_read(id)))
    }

    /// Mark every shown unread notification read, paced in batches
    pub fn mark_all_read(&self) -> JoinHandle<BatchReport> {
        let mutations = self
            .subscription
            .cache()
            .read()
            .items()
            .iter()
            .filter(|n| !n.read)
            .map(|n| mark_read(&n.id))
            .collect();
        self.subscription.apply_batch(mutations)
    }

    pub fn dismiss(&self, id: &str) -> MutationTicket {
        self.subscription.apply(PendingMutation::delete(id))
    }
}

fn mark_read(id: &str) -> PendingMutation<Notification> {
    PendingMutation::update(
        id,
        Patch::update(|n: &mut Notification| n.read = true),
        Notification::mark_read_fields(),
    )
}

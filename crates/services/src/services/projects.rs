//! "My projects": projects the user owns or collaborates on

use std::{collections::HashSet, sync::Arc};

use entities::models::project::{Project, ProjectStatus};
use remote::{Query, RemoteCollection, SortKey};
use tracing::debug;

use super::{
    cache::Patch,
    config::SyncConfig,
    error::SyncError,
    optimistic::{MutationTicket, PendingMutation},
    subscription::CollectionSubscription,
};

pub const PROJECTS_LIMIT: usize = 50;

/// The hosted query language only ANDs equality filters, so owned and
/// shared projects are two subscriptions merged on read
pub struct MyProjectsView {
    user_email: String,
    owned: CollectionSubscription<Project>,
    shared: CollectionSubscription<Project>,
}

impl MyProjectsView {
    pub fn open(remote: Arc<dyn RemoteCollection<Project>>, user_email: &str) -> Self {
        Self::with_config(remote, user_email, SyncConfig::projects())
    }

    pub fn with_config(
        remote: Arc<dyn RemoteCollection<Project>>,
        user_email: &str,
        config: SyncConfig,
    ) -> Self {
        let query = |filter| {
            Query::new()
                .filter(filter)
                .sort(SortKey::desc("updated_date"))
                .limit(PROJECTS_LIMIT)
        };
        Self {
            user_email: user_email.to_string(),
            owned: CollectionSubscription::open(
                Arc::clone(&remote),
                query(Project::owned_by(user_email)),
                config.clone(),
            ),
            shared: CollectionSubscription::open(
                remote,
                query(Project::with_collaborator(user_email)),
                config,
            ),
        }
    }

    pub fn user_email(&self) -> &str {
        &self.user_email
    }

    /// Owned and shared projects, most recently updated first, without
    /// duplicates
    pub fn projects(&self) -> Vec<Project> {
        let mut seen = HashSet::new();
        let mut projects: Vec<Project> = self
            .owned
            .items()
            .into_iter()
            .chain(self.shared.items())
            .filter(|project| seen.insert(project.id.clone()))
            .collect();
        projects.sort_by(|a, b| b.updated_date.cmp(&a.updated_date));
        projects
    }

    pub fn is_owner(&self, id: &str) -> bool {
        self.owned.cache().read().get(id).is_some()
    }

    pub async fn refresh(&self) -> Result<(), SyncError> {
        let (owned, shared) = tokio::join!(self.owned.refresh(), self.shared.refresh());
        owned?;
        shared?;
        Ok(())
    }

    /// Returns `None` when the project is not in either list
    pub fn set_status(&self, id: &str, status: ProjectStatus) -> Option<MutationTicket> {
        let subscription = if self.is_owner(id) {
            &self.owned
        } else if self.shared.cache().read().get(id).is_some() {
            &self.shared
        } else {
            debug!(project_id = id, "Status change for unknown project");
            return None;
        };

        let fields = Project::status_fields(&status);
        let patch = Patch::update(move |project: &mut Project| project.status = status.clone());
        Some(subscription.apply(PendingMutation::update(id, patch, fields)))
    }

    pub fn archive(&self, id: &str) -> Option<MutationTicket> {
        self.set_status(id, ProjectStatus::Archived)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use remote::memory::InMemoryCollection;

    use super::*;

    fn project(id: &str, owner: &str, collaborators: &[&str], hour: u32) -> Project {
        Project {
            id: id.to_string(),
            title: format!("project {id}"),
            owner_email: owner.to_string(),
            collaborator_emails: collaborators.iter().map(|c| c.to_string()).collect(),
            status: ProjectStatus::Seeking,
            updated_date: Utc.with_ymd_and_hms(2025, 3, 1, hour, 0, 0).unwrap(),
        }
    }

    async fn loaded(remote: Arc<InMemoryCollection<Project>>) -> MyProjectsView {
        let view = MyProjectsView::open(remote, "ada@example.com");
        view.refresh().await.unwrap();
        view
    }

    #[tokio::test(start_paused = true)]
    async fn merges_owned_and_shared_projects() {
        let remote = Arc::new(InMemoryCollection::with_items(vec![
            project("p1", "ada@example.com", &[], 9),
            project("p2", "grace@example.com", &["ada@example.com"], 11),
            project("p3", "grace@example.com", &[], 12),
            project("p4", "ada@example.com", &["ada@example.com"], 10),
        ]));
        let view = loaded(remote).await;

        let ids: Vec<_> = view.projects().into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec!["p2", "p4", "p1"]);
        assert!(view.is_owner("p1"));
        assert!(!view.is_owner("p2"));
    }

    #[tokio::test(start_paused = true)]
    async fn archiving_a_shared_project_writes_through() {
        let remote = Arc::new(InMemoryCollection::with_items(vec![project(
            "p2",
            "grace@example.com",
            &["ada@example.com"],
            11,
        )]));
        let view = loaded(remote.clone()).await;

        assert!(view.archive("nope").is_none());
        let ticket = view.archive("p2").unwrap();
        assert_eq!(view.projects()[0].status, ProjectStatus::Archived);

        assert!(ticket.outcome().await.is_confirmed());
        assert_eq!(remote.get("p2").unwrap().status, ProjectStatus::Archived);
        // the server bumped updated_date and the cache took its copy
        assert_eq!(view.projects()[0], remote.get("p2").unwrap());
    }
}

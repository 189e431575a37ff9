//! Optimistic writes: patch the cache now, write remotely, resync on failure

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use entities::{Entity, Fields};
use futures::future::join_all;
use remote::{RemoteCollection, RemoteError};
use strum_macros::Display;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    cache::{InsertPosition, MutationId, Patch},
    config::SyncConfig,
    error::SyncError,
    fetch_scheduler::FetchScheduler,
    retry::RetryPolicy,
};

/// Remote write backing an optimistic patch. Updates should set fields to
/// absolute values; a retried write may be applied twice
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteOperation {
    Update { id: String, fields: Fields },
    Create { fields: Fields },
    Delete { id: String },
}

impl RemoteOperation {
    fn name(&self) -> &'static str {
        match self {
            Self::Update { .. } => "update",
            Self::Create { .. } => "create",
            Self::Delete { .. } => "delete",
        }
    }
}

/// What happens to the optimistic edit when its write fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ReconciliationPolicy {
    /// Keep showing the guess until a forced fetch replaces it. Permanent
    /// failures are still reverted immediately
    #[default]
    Resync,
    /// Revert on every failure, then resync
    Revert,
}

#[derive(Debug, Clone)]
pub struct PendingMutation<T> {
    pub target: String,
    pub patch: Patch<T>,
    pub remote: RemoteOperation,
    pub policy: ReconciliationPolicy,
}

impl<T: Entity> PendingMutation<T> {
    pub fn update(id: impl Into<String>, patch: Patch<T>, fields: Fields) -> Self {
        let id = id.into();
        Self {
            target: id.clone(),
            patch,
            remote: RemoteOperation::Update { id, fields },
            policy: ReconciliationPolicy::default(),
        }
    }

    /// Show `placeholder` (usually carrying a temp id) until the server
    /// returns the stored record
    pub fn create(placeholder: T, position: InsertPosition, fields: Fields) -> Self {
        Self {
            target: placeholder.id().to_string(),
            patch: Patch::Insert {
                item: placeholder,
                position,
            },
            remote: RemoteOperation::Create { fields },
            policy: ReconciliationPolicy::default(),
        }
    }

    pub fn delete(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            target: id.clone(),
            patch: Patch::Remove,
            remote: RemoteOperation::Delete { id },
            policy: ReconciliationPolicy::Revert,
        }
    }

    pub fn with_policy(mut self, policy: ReconciliationPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome {
    /// The write landed; `canonical_id` is set when the server returned a record
    Confirmed { canonical_id: Option<String> },
    /// Retries ran out; the cache was resynchronized from the server
    Reconciled { error: RemoteError },
    /// The server refused the write for good; the edit was reverted
    Rejected { error: RemoteError },
    /// The write task panicked or was aborted before reporting back. Single
    /// writes outlive their view, so closing a view never produces this
    Abandoned,
}

impl MutationOutcome {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Self::Confirmed { .. })
    }
}

/// Handle to a mutation whose remote write is running in the background
#[derive(Debug)]
pub struct MutationTicket {
    pub id: MutationId,
    pub target: String,
    handle: JoinHandle<MutationOutcome>,
}

impl MutationTicket {
    pub async fn outcome(self) -> MutationOutcome {
        self.handle.await.unwrap_or(MutationOutcome::Abandoned)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub abandoned: usize,
    pub batches: usize,
}

struct CoordinatorInner<T: Entity> {
    scheduler: FetchScheduler<T>,
    remote: Arc<dyn RemoteCollection<T>>,
    retry: RetryPolicy,
    batch_size: usize,
    batch_pause: std::time::Duration,
    cancel: CancellationToken,
    next_id: AtomicU64,
}

pub struct MutationCoordinator<T: Entity> {
    inner: Arc<CoordinatorInner<T>>,
}

impl<T: Entity> Clone for MutationCoordinator<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Entity> MutationCoordinator<T> {
    pub fn new(
        scheduler: FetchScheduler<T>,
        remote: Arc<dyn RemoteCollection<T>>,
        config: &SyncConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                scheduler,
                remote,
                retry: RetryPolicy::from_config(config),
                batch_size: config.batch_size.max(1),
                batch_pause: config.batch_pause(),
                cancel,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn scheduler(&self) -> &FetchScheduler<T> {
        &self.inner.scheduler
    }

    /// Patch the cache synchronously and start the remote write
    ///
    /// The write is not tied to the view's lifetime: a message sent right
    /// before navigating away is still delivered
    pub fn apply(&self, mutation: PendingMutation<T>) -> MutationTicket {
        let PendingMutation {
            target,
            patch,
            remote,
            policy,
        } = mutation;
        let id = self.stage(&target, patch);

        let coordinator = self.clone();
        let ticket_target = target.clone();
        let handle = tokio::spawn(async move {
            let result = coordinator.execute(&remote).await;
            coordinator.settle(id, &target, policy, result).await
        });

        MutationTicket {
            id,
            target: ticket_target,
            handle,
        }
    }

    pub async fn apply_and_wait(&self, mutation: PendingMutation<T>) -> MutationOutcome {
        self.apply(mutation).outcome().await
    }

    /// Apply every patch now, then write in batches of `batch_size` with a
    /// pause between batches. Cancelling the view abandons the remaining
    /// batches; one forced fetch afterwards reconciles whatever failed
    pub fn apply_batch(&self, mutations: Vec<PendingMutation<T>>) -> JoinHandle<BatchReport> {
        let staged: Vec<_> = mutations
            .into_iter()
            .map(|mutation| {
                let id = self.stage(&mutation.target, mutation.patch);
                (id, mutation.target, mutation.remote, mutation.policy)
            })
            .collect();

        let coordinator = self.clone();
        tokio::spawn(async move { coordinator.run_batches(staged).await })
    }

    fn stage(&self, target: &str, patch: Patch<T>) -> MutationId {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(collection = T::NAME, mutation_id = id, target, ?patch, "Applying optimistic patch");
        let found = self
            .inner
            .scheduler
            .cache()
            .update(|cache| cache.apply(id, target, patch));
        if !found {
            debug!(collection = T::NAME, mutation_id = id, target, "Patch target not cached");
        }
        id
    }

    async fn execute(&self, operation: &RemoteOperation) -> Result<Option<T>, RemoteError> {
        let inner = &*self.inner;
        let label = format!("{}.{}", T::NAME, operation.name());
        match operation {
            RemoteOperation::Update { id, fields } => inner
                .retry
                .run(&label, || inner.remote.update(id, fields.clone()))
                .await
                .map(Some),
            RemoteOperation::Create { fields } => inner
                .retry
                .run(&label, || inner.remote.create(fields.clone()))
                .await
                .map(Some),
            RemoteOperation::Delete { id } => inner
                .retry
                .run(&label, || inner.remote.delete(id))
                .await
                .map(|()| None),
        }
    }

    async fn settle(
        &self,
        id: MutationId,
        target: &str,
        policy: ReconciliationPolicy,
        result: Result<Option<T>, RemoteError>,
    ) -> MutationOutcome {
        match result {
            Ok(canonical) => {
                let canonical_id = canonical.as_ref().map(|item| item.id().to_string());
                self.inner
                    .scheduler
                    .settle(|cache| cache.confirm(id, canonical));
                debug!(collection = T::NAME, mutation_id = id, target, "Mutation confirmed");
                MutationOutcome::Confirmed { canonical_id }
            }
            Err(error) => {
                let revert = self.discard(id, target, policy, &error);
                self.resync().await;
                if revert && error.is_permanent() {
                    MutationOutcome::Rejected { error }
                } else {
                    MutationOutcome::Reconciled { error }
                }
            }
        }
    }

    /// Stop replaying a failed edit. Returns true when it was reverted on the
    /// spot rather than left for the resync
    fn discard(
        &self,
        id: MutationId,
        target: &str,
        policy: ReconciliationPolicy,
        error: &RemoteError,
    ) -> bool {
        let revert = error.is_permanent() || policy == ReconciliationPolicy::Revert;
        warn!(
            collection = T::NAME,
            mutation_id = id,
            target,
            error = %error,
            kind = %error.kind(),
            %policy,
            revert,
            "Mutation failed, reconciling"
        );
        self.inner.scheduler.settle(|cache| {
            if revert {
                cache.revert(id)
            } else {
                cache.forget(id)
            }
        });
        revert
    }

    async fn resync(&self) {
        match self.inner.scheduler.request_fetch(true).await {
            Ok(outcome) => debug!(collection = T::NAME, ?outcome, "Resync finished"),
            Err(SyncError::Cancelled) => {}
            Err(e) => warn!(
                collection = T::NAME,
                error = %e,
                "Resync failed, next poll will reconcile"
            ),
        }
    }

    async fn run_batches(
        &self,
        staged: Vec<(MutationId, String, RemoteOperation, ReconciliationPolicy)>,
    ) -> BatchReport {
        let inner = &*self.inner;
        let mut report = BatchReport {
            attempted: staged.len(),
            ..BatchReport::default()
        };
        let chunks: Vec<_> = staged.chunks(inner.batch_size).collect();

        for (index, chunk) in chunks.iter().enumerate() {
            if inner.cancel.is_cancelled() {
                self.abandon(&chunks[index..], &mut report);
                break;
            }

            let results = join_all(chunk.iter().map(|(_, _, op, _)| self.execute(op))).await;
            report.batches += 1;
            for ((id, target, _, policy), result) in chunk.iter().zip(results) {
                match result {
                    Ok(canonical) => {
                        inner.scheduler.settle(|cache| cache.confirm(*id, canonical));
                        report.succeeded += 1;
                    }
                    Err(error) => {
                        self.discard(*id, target, *policy, &error);
                        report.failed += 1;
                    }
                }
            }

            if index + 1 < chunks.len() {
                tokio::select! {
                    _ = inner.cancel.cancelled() => {
                        self.abandon(&chunks[index + 1..], &mut report);
                        break;
                    }
                    _ = tokio::time::sleep(inner.batch_pause) => {}
                }
            }
        }

        if report.failed > 0 {
            self.resync().await;
        }
        info!(
            collection = T::NAME,
            attempted = report.attempted,
            succeeded = report.succeeded,
            failed = report.failed,
            abandoned = report.abandoned,
            batches = report.batches,
            "Batch mutation finished"
        );
        report
    }

    fn abandon(
        &self,
        remaining: &[&[(MutationId, String, RemoteOperation, ReconciliationPolicy)]],
        report: &mut BatchReport,
    ) {
        let ids: Vec<MutationId> = remaining
            .iter()
            .flat_map(|chunk| chunk.iter().map(|(id, ..)| *id))
            .collect();
        report.abandoned += ids.len();
        self.inner.scheduler.settle(|cache| {
            for id in &ids {
                cache.forget(*id);
            }
        });
        debug!(collection = T::NAME, abandoned = ids.len(), "Batch abandoned");
    }
}

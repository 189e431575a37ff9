//! Keeps a [`SharedCache`] in step with its remote collection

use std::{future::Future, sync::Arc, time::Duration};

use entities::Entity;
use parking_lot::Mutex;
use remote::{Query, RemoteCollection, RemoteError};
use strum_macros::Display;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    cache::{LocalCache, SharedCache},
    config::SyncConfig,
    error::SyncError,
    retry::RetryPolicy,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum SuppressReason {
    InFlight,
    TooSoon,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The cache now mirrors this many fetched items
    Applied { items: usize },
    Suppressed(SuppressReason),
    /// The result arrived after the cache was cleared or a newer fetch was
    /// issued, and was dropped
    Discarded,
}

/// Extra fetches a single request makes when writes settle under it
const STALE_REFETCH_LIMIT: u32 = 3;

#[derive(Debug, Default)]
struct FetchState {
    last_fetch: Option<Instant>,
    in_flight: bool,
    issued: u64,
    generation: u64,
    /// Bumped whenever a write settles in the cache
    write_epoch: u64,
}

enum Landing {
    Done(FetchOutcome),
    Stale { write_epoch: u64 },
}

struct SchedulerInner<T: Entity> {
    remote: Arc<dyn RemoteCollection<T>>,
    query: Query,
    cache: Arc<SharedCache<T>>,
    retry: RetryPolicy,
    min_interval: Duration,
    fetch_timeout: Option<Duration>,
    state: Mutex<FetchState>,
    cancel: CancellationToken,
    polling: Mutex<Option<CancellationToken>>,
}

/// Single-flight, rate-limited fetching plus an optional polling loop
pub struct FetchScheduler<T: Entity> {
    inner: Arc<SchedulerInner<T>>,
}

impl<T: Entity> Clone for FetchScheduler<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Releases the in-flight slot however the fetch ends, unless a newer fetch
/// already owns it
struct InFlightGuard<'a> {
    state: &'a Mutex<FetchState>,
    seq: u64,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        if state.issued == self.seq {
            state.in_flight = false;
        }
    }
}

impl<T: Entity> FetchScheduler<T> {
    pub fn new(
        remote: Arc<dyn RemoteCollection<T>>,
        query: Query,
        cache: Arc<SharedCache<T>>,
        config: &SyncConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                remote,
                query,
                cache,
                retry: RetryPolicy::from_config(config),
                min_interval: config.min_fetch_interval(),
                fetch_timeout: config.fetch_timeout(),
                state: Mutex::new(FetchState::default()),
                cancel,
                polling: Mutex::new(None),
            }),
        }
    }

    pub fn cache(&self) -> &Arc<SharedCache<T>> {
        &self.inner.cache
    }

    pub fn query(&self) -> &Query {
        &self.inner.query
    }

    pub fn is_in_flight(&self) -> bool {
        self.inner.state.lock().in_flight
    }

    /// When the cache last took a successful fetch
    pub fn last_fetch(&self) -> Option<Instant> {
        self.inner.state.lock().last_fetch
    }

    /// Fetch unless one is already in flight or, when not `forced`, the last
    /// successful fetch was less than the minimum interval ago
    ///
    /// A failed fetch leaves the cache and the last-fetch time untouched. A
    /// snapshot taken before a write settled is dropped and fetched again,
    /// so a request coalesced into this fetch still sees the write
    pub async fn request_fetch(&self, forced: bool) -> Result<FetchOutcome, SyncError> {
        let inner = &*self.inner;
        if inner.cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let (seq, generation, mut epoch) = {
            let mut state = inner.state.lock();
            if state.in_flight {
                debug!(collection = T::NAME, forced, "Fetch already in flight, coalescing");
                return Ok(FetchOutcome::Suppressed(SuppressReason::InFlight));
            }
            if !forced
                && state
                    .last_fetch
                    .is_some_and(|last| last.elapsed() < inner.min_interval)
            {
                debug!(collection = T::NAME, "Fetch suppressed, minimum interval not reached");
                return Ok(FetchOutcome::Suppressed(SuppressReason::TooSoon));
            }
            state.in_flight = true;
            state.issued += 1;
            (state.issued, state.generation, state.write_epoch)
        };
        let _guard = InFlightGuard {
            state: &inner.state,
            seq,
        };

        let label = format!("{}.fetch", T::NAME);
        for round in 0..=STALE_REFETCH_LIMIT {
            let fetch = inner.retry.run(&label, || {
                with_timeout(inner.fetch_timeout, inner.remote.fetch(&inner.query))
            });

            let result = tokio::select! {
                _ = inner.cancel.cancelled() => {
                    debug!(collection = T::NAME, seq, "Fetch cancelled, result will be ignored");
                    return Err(SyncError::Cancelled);
                }
                result = fetch => result,
            };

            let items = match result {
                Ok(items) => items,
                Err(err) => {
                    warn!(
                        collection = T::NAME,
                        seq,
                        error = %err,
                        kind = %err.kind(),
                        "Fetch failed, keeping cached items"
                    );
                    return Err(err.into());
                }
            };

            match self.land(seq, generation, epoch, items, forced) {
                Landing::Done(outcome) => return Ok(outcome),
                Landing::Stale { write_epoch } => {
                    debug!(
                        collection = T::NAME,
                        seq,
                        round,
                        "Write settled while fetching, fetching again"
                    );
                    epoch = write_epoch;
                }
            }
        }

        debug!(collection = T::NAME, seq, "Writes kept settling, leaving it to the next poll");
        Ok(FetchOutcome::Discarded)
    }

    /// Install a fetched snapshot if nothing made it stale in the meantime
    fn land(
        &self,
        seq: u64,
        generation: u64,
        epoch: u64,
        items: Vec<T>,
        forced: bool,
    ) -> Landing {
        let inner = &*self.inner;
        let mut state = inner.state.lock();
        if state.generation != generation || state.issued != seq {
            debug!(
                collection = T::NAME,
                seq,
                latest = state.issued,
                "Discarding stale fetch result"
            );
            return Landing::Done(FetchOutcome::Discarded);
        }
        if state.write_epoch != epoch {
            return Landing::Stale {
                write_epoch: state.write_epoch,
            };
        }

        state.last_fetch = Some(Instant::now());
        let count = items.len();
        inner.cache.update(|cache| cache.replace(items));
        debug!(collection = T::NAME, seq, items = count, forced, "Fetch applied");
        Landing::Done(FetchOutcome::Applied { items: count })
    }

    /// Settle a write in the cache (confirm, forget or revert). Snapshots
    /// requested before this point no longer reflect the server and are
    /// refetched instead of applied
    pub fn settle<R>(&self, f: impl FnOnce(&mut LocalCache<T>) -> R) -> R {
        let mut state = self.inner.state.lock();
        state.write_epoch += 1;
        self.inner.cache.update(f)
    }

    /// Fire-and-forget variant for UI triggers such as a panel opening or the
    /// window regaining focus
    pub fn trigger(&self, forced: bool) {
        let scheduler = self.clone();
        tokio::spawn(async move {
            match scheduler.request_fetch(forced).await {
                Ok(outcome) => debug!(collection = T::NAME, ?outcome, "Triggered fetch finished"),
                Err(SyncError::Cancelled) => {}
                Err(e) => warn!(collection = T::NAME, error = %e, "Triggered fetch failed"),
            }
        });
    }

    /// Poll on a fixed cadence, replacing any loop already running. The first
    /// tick fires immediately
    pub fn start_polling(&self, period: Duration) {
        let token = self.inner.cancel.child_token();
        if let Some(previous) = self.inner.polling.lock().replace(token.clone()) {
            previous.cancel();
        }

        info!(collection = T::NAME, ?period, "Starting polling");
        let scheduler = self.clone();
        tokio::spawn(async move {
            scheduler.poll_loop(period, token).await;
        });
    }

    pub fn stop_polling(&self) {
        if let Some(token) = self.inner.polling.lock().take() {
            info!(collection = T::NAME, "Stopping polling");
            token.cancel();
        }
    }

    pub fn is_polling(&self) -> bool {
        self.inner
            .polling
            .lock()
            .as_ref()
            .is_some_and(|token| !token.is_cancelled())
    }

    /// Empty the cache and orphan any fetch still in flight, e.g. on sign-out
    pub fn clear(&self) {
        {
            let mut state = self.inner.state.lock();
            state.generation += 1;
            state.in_flight = false;
            state.last_fetch = None;
        }
        self.inner.cache.update(|cache| cache.clear());
    }

    async fn poll_loop(self, period: Duration, token: CancellationToken) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            tokio::select! {
                _ = token.cancelled() => break,
                result = self.request_fetch(false) => match result {
                    Ok(outcome) => debug!(collection = T::NAME, ?outcome, "Poll finished"),
                    Err(SyncError::Cancelled) => break,
                    Err(e) => warn!(collection = T::NAME, error = %e, "Poll failed, retrying next tick"),
                },
            }
        }
        debug!(collection = T::NAME, "Polling loop exited");
    }
}

async fn with_timeout<R>(
    limit: Option<Duration>,
    call: impl Future<Output = Result<R, RemoteError>>,
) -> Result<R, RemoteError> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, call)
            .await
            .unwrap_or(Err(RemoteError::Timeout)),
        None => call.await,
    }
}

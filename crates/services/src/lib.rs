//! Client-side sync for Collab Unity collections: polling, optimistic writes
//! and rate-limit back-off over a [`remote::RemoteCollection`]

pub mod services;

pub use services::{
    cache::{InsertPosition, LocalCache, Patch, SharedCache},
    config::{ConfigError, SyncConfig, SyncSettings},
    error::SyncError,
    fetch_scheduler::{FetchOutcome, FetchScheduler, SuppressReason},
    identity::IdentityScope,
    optimistic::{
        BatchReport, MutationCoordinator, MutationOutcome, MutationTicket, PendingMutation,
        ReconciliationPolicy, RemoteOperation,
    },
    retry::RetryPolicy,
    subscription::CollectionSubscription,
};

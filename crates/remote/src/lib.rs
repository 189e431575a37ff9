//! Access to the hosted entity backend
//!
//! The sync layer only talks to collections through [`RemoteCollection`],
//! so the HTTP client and the in-process [`memory::InMemoryCollection`] are
//! interchangeable

pub mod error;
pub mod http;
pub mod memory;
pub mod query;

use async_trait::async_trait;
use entities::{Entity, Fields};

pub use error::{ErrorKind, RemoteError};
pub use query::{Query, SortKey};

/// An externally owned, queryable collection of `T`
#[async_trait]
pub trait RemoteCollection<T: Entity>: Send + Sync {
    /// Read with server-side filter, sort and limit
    async fn fetch(&self, query: &Query) -> Result<Vec<T>, RemoteError>;

    /// Idempotent partial update by identifier
    async fn update(&self, id: &str, fields: Fields) -> Result<T, RemoteError>;

    /// Create a record; the response carries the server-assigned id
    async fn create(&self, fields: Fields) -> Result<T, RemoteError>;

    async fn delete(&self, id: &str) -> Result<(), RemoteError>;
}

//! In-process collection standing in for the hosted backend
//!
//! Honors filter, sort and limit, assigns server ids and timestamps, and can
//! be scripted to fail, which makes it the simulated server for sync tests
//! and offline development

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use entities::{Entity, Fields};
use parking_lot::Mutex;
use serde_json::Value;
use strum_macros::Display;

use crate::{Query, RemoteCollection, RemoteError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Operation {
    Fetch,
    Update,
    Create,
    Delete,
}

/// How a scripted failure behaves
#[derive(Debug, Clone)]
pub enum Failure {
    /// Reject the call without touching stored state
    Reject(RemoteError),
    /// Apply the call, then report an error as if the response was lost
    AcceptThenFail(RemoteError),
}

#[derive(Debug, Clone)]
struct Script {
    failure: Failure,
    remaining: Option<usize>,
}

struct MemoryState<T> {
    items: Vec<T>,
    scripts: HashMap<Operation, Script>,
    calls: HashMap<Operation, usize>,
    latency: HashMap<Operation, Duration>,
    next_id: u64,
    last_timestamp: Option<DateTime<Utc>>,
}

pub struct InMemoryCollection<T> {
    state: Mutex<MemoryState<T>>,
}

impl<T: Entity> Default for InMemoryCollection<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Entity> InMemoryCollection<T> {
    pub fn new() -> Self {
        Self::with_items(Vec::new())
    }

    pub fn with_items(items: Vec<T>) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                items,
                scripts: HashMap::new(),
                calls: HashMap::new(),
                latency: HashMap::new(),
                next_id: 1,
                last_timestamp: None,
            }),
        }
    }

    /// Server-side insert, as if another client wrote the record
    pub fn insert(&self, item: T) {
        self.state.lock().items.push(item);
    }

    pub fn items(&self) -> Vec<T> {
        self.state.lock().items.clone()
    }

    pub fn get(&self, id: &str) -> Option<T> {
        self.state
            .lock()
            .items
            .iter()
            .find(|item| item.id() == id)
            .cloned()
    }

    /// Number of times `op` was invoked, including failed calls
    pub fn calls(&self, op: Operation) -> usize {
        self.state.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Fail the next `times` calls of `op`
    pub fn fail_next(&self, op: Operation, times: usize, failure: Failure) {
        self.state.lock().scripts.insert(
            op,
            Script {
                failure,
                remaining: Some(times),
            },
        );
    }

    /// Fail every call of `op` until [`Self::heal`] is called
    pub fn fail_always(&self, op: Operation, failure: Failure) {
        self.state.lock().scripts.insert(
            op,
            Script {
                failure,
                remaining: None,
            },
        );
    }

    pub fn heal(&self, op: Operation) {
        self.state.lock().scripts.remove(&op);
    }

    /// Delay every call of `op` by `latency` before it is served
    pub fn set_latency(&self, op: Operation, latency: Duration) {
        self.state.lock().latency.insert(op, latency);
    }

    /// Count the call and pick up its latency and scripted failure, if any
    fn begin(&self, op: Operation) -> (Option<Duration>, Option<Failure>) {
        let mut state = self.state.lock();
        *state.calls.entry(op).or_default() += 1;
        let latency = state.latency.get(&op).copied();

        let failure = match state.scripts.get_mut(&op) {
            Some(script) => match script.remaining.as_mut() {
                Some(0) => None,
                Some(remaining) => {
                    *remaining -= 1;
                    Some(script.failure.clone())
                }
                None => Some(script.failure.clone()),
            },
            None => None,
        };
        (latency, failure)
    }

    async fn serve<R>(
        &self,
        op: Operation,
        apply: impl FnOnce(&mut MemoryState<T>) -> Result<R, RemoteError>,
    ) -> Result<R, RemoteError> {
        let (latency, failure) = self.begin(op);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        match failure {
            Some(Failure::Reject(err)) => Err(err),
            Some(Failure::AcceptThenFail(err)) => {
                apply(&mut self.state.lock())?;
                Err(err)
            }
            None => apply(&mut self.state.lock()),
        }
    }
}

impl<T: Entity> MemoryState<T> {
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let stamp = match self.last_timestamp {
            Some(last) if now <= last => last + TimeDelta::milliseconds(1),
            _ => now,
        };
        self.last_timestamp = Some(stamp);
        stamp
    }

    fn position(&self, id: &str) -> Result<usize, RemoteError> {
        self.items
            .iter()
            .position(|item| item.id() == id)
            .ok_or_else(|| RemoteError::NotFound(format!("{} {id}", T::NAME)))
    }
}

fn to_record<T: Entity>(item: &T) -> Result<Value, RemoteError> {
    serde_json::to_value(item).map_err(|e| RemoteError::Serde(e.to_string()))
}

fn from_record<T: Entity>(record: Value) -> Result<T, RemoteError> {
    serde_json::from_value(record).map_err(|e| RemoteError::Invalid(e.to_string()))
}

#[async_trait]
impl<T: Entity> RemoteCollection<T> for InMemoryCollection<T> {
    async fn fetch(&self, query: &Query) -> Result<Vec<T>, RemoteError> {
        self.serve(Operation::Fetch, |state| {
            let mut matched = Vec::new();
            for item in &state.items {
                let record = to_record(item)?;
                if query.matches(&record) {
                    matched.push((record, item.clone()));
                }
            }
            matched.sort_by(|(a, _), (b, _)| query.compare(a, b));
            let limit = query.limit.unwrap_or(usize::MAX);
            Ok(matched
                .into_iter()
                .take(limit)
                .map(|(_, item)| item)
                .collect())
        })
        .await
    }

    async fn update(&self, id: &str, fields: Fields) -> Result<T, RemoteError> {
        self.serve(Operation::Update, |state| {
            let index = state.position(id)?;
            let mut record = to_record(&state.items[index])?;
            if let Value::Object(map) = &mut record {
                for (key, value) in fields {
                    if key != "id" {
                        map.insert(key, value);
                    }
                }
                let stamp = state.next_timestamp();
                if map.contains_key("updated_date") {
                    map.insert("updated_date".to_string(), Value::String(stamp.to_rfc3339()));
                }
            }
            let updated: T = from_record(record)?;
            state.items[index] = updated.clone();
            Ok(updated)
        })
        .await
    }

    async fn create(&self, fields: Fields) -> Result<T, RemoteError> {
        self.serve(Operation::Create, |state| {
            let mut record = fields;
            let id = format!("{}-{}", T::NAME.to_lowercase(), state.next_id);
            state.next_id += 1;
            let stamp = Value::String(state.next_timestamp().to_rfc3339());
            record.insert("id".to_string(), Value::String(id));
            record
                .entry("created_date".to_string())
                .or_insert_with(|| stamp.clone());
            record
                .entry("updated_date".to_string())
                .or_insert(stamp);

            let created: T = from_record(Value::Object(record))?;
            state.items.push(created.clone());
            Ok(created)
        })
        .await
    }

    async fn delete(&self, id: &str) -> Result<(), RemoteError> {
        self.serve(Operation::Delete, |state| {
            let index = state.position(id)?;
            state.items.remove(index);
            Ok(())
        })
        .await
    }
}

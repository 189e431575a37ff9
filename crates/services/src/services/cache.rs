//! In-memory mirror of a remote collection with pending optimistic edits

use std::{fmt, sync::Arc};

use entities::Entity;
use parking_lot::{RwLock, RwLockReadGuard};
use tokio::sync::watch;

/// Identifies the mutation that produced a pending edit
pub type MutationId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPosition {
    Front,
    Back,
}

/// Local change applied ahead of the server
pub enum Patch<T> {
    Update(Arc<dyn Fn(&mut T) + Send + Sync>),
    Insert { item: T, position: InsertPosition },
    Remove,
}

impl<T> Patch<T> {
    pub fn update(f: impl Fn(&mut T) + Send + Sync + 'static) -> Self {
        Self::Update(Arc::new(f))
    }
}

impl<T: Clone> Clone for Patch<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Update(f) => Self::Update(Arc::clone(f)),
            Self::Insert { item, position } => Self::Insert {
                item: item.clone(),
                position: *position,
            },
            Self::Remove => Self::Remove,
        }
    }
}

impl<T> fmt::Debug for Patch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Update(_) => f.write_str("Update"),
            Self::Insert { position, .. } => write!(f, "Insert({position:?})"),
            Self::Remove => f.write_str("Remove"),
        }
    }
}

#[derive(Debug, Clone)]
struct PendingEdit<T> {
    mutation: MutationId,
    target: String,
    patch: Patch<T>,
}

/// Snapshot of the last successful fetch plus the edits not yet confirmed
///
/// `items()` is always `base` with every pending edit replayed in mutation
/// order, so a fresh snapshot never wipes out a write that is still in
/// flight
#[derive(Debug)]
pub struct LocalCache<T> {
    base: Vec<T>,
    view: Vec<T>,
    pending: Vec<PendingEdit<T>>,
    unread: usize,
    revision: u64,
    loaded: bool,
}

impl<T: Entity> Default for LocalCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Entity> LocalCache<T> {
    pub fn new() -> Self {
        Self {
            base: Vec::new(),
            view: Vec::new(),
            pending: Vec::new(),
            unread: 0,
            revision: 0,
            loaded: false,
        }
    }

    pub fn items(&self) -> &[T] {
        &self.view
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.view.iter().find(|item| item.id() == id)
    }

    pub fn len(&self) -> usize {
        self.view.len()
    }

    pub fn is_empty(&self) -> bool {
        self.view.is_empty()
    }

    pub fn unread_count(&self) -> usize {
        self.unread
    }

    /// Bumped on every visible change
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// True once the first fetch has been applied
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn has_pending(&self, mutation: MutationId) -> bool {
        self.pending.iter().any(|edit| edit.mutation == mutation)
    }

    /// Whether `id` is covered by an unconfirmed edit
    pub fn is_pending(&self, id: &str) -> bool {
        self.pending.iter().any(|edit| edit.target == id)
    }

    /// Install a fresh server snapshot and replay pending edits over it
    pub fn replace(&mut self, items: Vec<T>) {
        self.base = items;
        self.loaded = true;
        self.materialize();
    }

    /// Apply an optimistic edit. Returns false when an update or removal
    /// targets an item that is not cached; the edit is still recorded so it
    /// replays if a later snapshot brings the item in
    pub fn apply(&mut self, mutation: MutationId, target: &str, patch: Patch<T>) -> bool {
        let (found, unread_delta) = apply_edit(&mut self.view, target, &patch);
        self.unread = match unread_delta {
            UnreadDelta::Decrement => self.unread.saturating_sub(1),
            UnreadDelta::Increment => self.unread + 1,
            UnreadDelta::None => self.unread,
        };
        self.pending.push(PendingEdit {
            mutation,
            target: target.to_string(),
            patch,
        });
        self.revision += 1;
        found
    }

    /// The remote write landed. Fold the edit into the snapshot, substituting
    /// the server's canonical record when one came back
    pub fn confirm(&mut self, mutation: MutationId, canonical: Option<T>) {
        let Some(edit) = self.take_pending(mutation) else {
            return;
        };

        match (&edit.patch, canonical) {
            (Patch::Insert { position, .. }, Some(server)) => {
                if !self.base.iter().any(|item| item.id() == server.id()) {
                    insert_at(&mut self.base, server, *position);
                }
            }
            (Patch::Update(_), Some(server)) => {
                match self.base.iter().position(|item| item.id() == edit.target) {
                    Some(index) => self.base[index] = server,
                    None => {
                        apply_edit(&mut self.base, &edit.target, &edit.patch);
                    }
                }
            }
            _ => {
                apply_edit(&mut self.base, &edit.target, &edit.patch);
            }
        }
        self.materialize();
    }

    /// Stop replaying the edit without touching the visible items; the next
    /// snapshot decides what the truth is
    pub fn forget(&mut self, mutation: MutationId) {
        self.take_pending(mutation);
    }

    /// Drop the edit and rebuild the view without it
    pub fn revert(&mut self, mutation: MutationId) {
        if self.take_pending(mutation).is_some() {
            self.materialize();
        }
    }

    pub fn clear(&mut self) {
        self.base.clear();
        self.view.clear();
        self.pending.clear();
        self.unread = 0;
        self.loaded = false;
        self.revision += 1;
    }

    fn take_pending(&mut self, mutation: MutationId) -> Option<PendingEdit<T>> {
        let index = self
            .pending
            .iter()
            .position(|edit| edit.mutation == mutation)?;
        Some(self.pending.remove(index))
    }

    fn materialize(&mut self) {
        let mut view = self.base.clone();
        for edit in &self.pending {
            apply_edit(&mut view, &edit.target, &edit.patch);
        }
        self.unread = view.iter().filter(|item| item.is_unread()).count();
        self.view = view;
        self.revision += 1;
    }
}

enum UnreadDelta {
    Increment,
    Decrement,
    None,
}

fn unread_delta(before: bool, after: bool) -> UnreadDelta {
    match (before, after) {
        (true, false) => UnreadDelta::Decrement,
        (false, true) => UnreadDelta::Increment,
        _ => UnreadDelta::None,
    }
}

fn insert_at<T>(items: &mut Vec<T>, item: T, position: InsertPosition) {
    match position {
        InsertPosition::Front => items.insert(0, item),
        InsertPosition::Back => items.push(item),
    }
}

fn apply_edit<T: Entity>(items: &mut Vec<T>, target: &str, patch: &Patch<T>) -> (bool, UnreadDelta) {
    let index = items.iter().position(|item| item.id() == target);
    match (patch, index) {
        (Patch::Update(f), Some(index)) => {
            let before = items[index].is_unread();
            f(&mut items[index]);
            (true, unread_delta(before, items[index].is_unread()))
        }
        (Patch::Remove, Some(index)) => {
            let removed = items.remove(index);
            (true, unread_delta(removed.is_unread(), false))
        }
        (Patch::Insert { .. }, Some(_)) => (true, UnreadDelta::None),
        (Patch::Insert { item, position }, None) => {
            let delta = unread_delta(false, item.is_unread());
            insert_at(items, item.clone(), *position);
            (true, delta)
        }
        (Patch::Update(_) | Patch::Remove, None) => (false, UnreadDelta::None),
    }
}

/// A cache shared between a scheduler and a coordinator, publishing its
/// revision to watchers after every write
#[derive(Debug)]
pub struct SharedCache<T> {
    cache: RwLock<LocalCache<T>>,
    changes: watch::Sender<u64>,
}

impl<T: Entity> Default for SharedCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Entity> SharedCache<T> {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            cache: RwLock::new(LocalCache::new()),
            changes,
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, LocalCache<T>> {
        self.cache.read()
    }

    /// Mutate under the write lock, then notify watchers if the revision moved
    pub fn update<R>(&self, f: impl FnOnce(&mut LocalCache<T>) -> R) -> R {
        let (result, revision) = {
            let mut cache = self.cache.write();
            let result = f(&mut cache);
            (result, cache.revision())
        };
        self.changes.send_if_modified(|current| {
            if *current == revision {
                false
            } else {
                *current = revision;
                true
            }
        });
        result
    }

    pub fn snapshot(&self) -> Vec<T> {
        self.cache.read().items().to_vec()
    }

    pub fn unread_count(&self) -> usize {
        self.cache.read().unread_count()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }
}

// ── Entity stores ──
//
// Keyed, lock-free storage for devices and rooms with per-entity listener
// registries. Listener dispatch is handed off to a spawned task so the
// inbound reader never waits on consumer code.

pub(crate) mod coalesce;

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::watch;

use crate::model::{Device, Entity, Room};

pub type DeviceStore = EntityStore<Device>;
pub type RoomStore = EntityStore<Room>;

/// Callback invoked with each dispatched update of one entity.
pub type Listener<U> = Arc<dyn Fn(&U) + Send + Sync>;

/// Handle returned by [`EntityStore::add_listener`], used to remove
/// exactly that registration again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Concurrent store for one entity kind.
///
/// Entities are held as `Arc<T>` so readers get cheap snapshots; updates
/// copy-on-write the stored value. Every mutation rebuilds the snapshot
/// that [`subscribe`](Self::subscribe) receivers see.
pub struct EntityStore<T: Entity> {
    entities: DashMap<String, Arc<T>>,
    listeners: DashMap<String, Vec<(ListenerId, Listener<T::Update>)>>,
    next_listener: AtomicU64,
    snapshot: watch::Sender<Arc<Vec<Arc<T>>>>,
}

impl<T: Entity> EntityStore<T> {
    pub fn new() -> Self {
        Self {
            entities: DashMap::new(),
            listeners: DashMap::new(),
            next_listener: AtomicU64::new(1),
            snapshot: watch::Sender::new(Arc::new(Vec::new())),
        }
    }

    // ── Entities ─────────────────────────────────────────────────────

    /// Insert or replace an entity. Returns `true` if the id was new.
    pub fn upsert(&self, entity: T) -> bool {
        let id = entity.id().to_owned();
        let is_new = self.entities.insert(id, Arc::new(entity)).is_none();
        self.rebuild_snapshot();
        is_new
    }

    pub fn get(&self, id: &str) -> Option<Arc<T>> {
        self.entities.get(id).map(|r| Arc::clone(r.value()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entities.contains_key(id)
    }

    /// All entities, ordered by id.
    pub fn all(&self) -> Vec<Arc<T>> {
        Vec::clone(&self.snapshot.borrow())
    }

    /// Fold an update into the stored entity. Returns `false` if the id is
    /// unknown.
    pub fn apply(&self, id: &str, update: &T::Update) -> bool {
        {
            let Some(mut entry) = self.entities.get_mut(id) else {
                return false;
            };
            Arc::make_mut(entry.value_mut()).apply(update);
        }
        self.rebuild_snapshot();
        true
    }

    /// First entity matching `predicate`, but only if it is the only one.
    pub fn find_unique(&self, predicate: impl Fn(&T) -> bool) -> Result<Arc<T>, usize> {
        let matches: Vec<Arc<T>> = self
            .entities
            .iter()
            .filter(|r| predicate(r.value()))
            .map(|r| Arc::clone(r.value()))
            .collect();
        match matches.as_slice() {
            [only] => Ok(Arc::clone(only)),
            _ => Err(matches.len()),
        }
    }

    /// Drop every entity (fresh discovery). Listener registrations survive.
    pub fn clear(&self) {
        self.entities.clear();
        self.rebuild_snapshot();
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Subscribe to snapshot changes.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<Arc<T>>>> {
        self.snapshot.subscribe()
    }

    // ── Listeners ────────────────────────────────────────────────────

    pub fn add_listener<F>(&self, id: &str, listener: F) -> ListenerId
    where
        F: Fn(&T::Update) + Send + Sync + 'static,
    {
        let listener_id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .entry(id.to_owned())
            .or_default()
            .push((listener_id, Arc::new(listener)));
        listener_id
    }

    /// Remove one registration. The entity's registry entry is dropped
    /// once its last listener is gone.
    pub fn remove_listener(&self, id: &str, listener_id: ListenerId) -> bool {
        let removed = match self.listeners.get_mut(id) {
            Some(mut registered) => {
                let before = registered.len();
                registered.retain(|(lid, _)| *lid != listener_id);
                before != registered.len()
            }
            None => false,
        };
        self.listeners.remove_if(id, |_, registered| registered.is_empty());
        removed
    }

    pub fn listener_count(&self, id: &str) -> usize {
        self.listeners.get(id).map_or(0, |r| r.len())
    }

    /// Dispatch an update to every listener of `id` on a separate task.
    ///
    /// A panicking listener is logged and skipped; the others still run.
    pub fn trigger_listeners(&self, id: &str, update: T::Update) {
        let listeners: Vec<Listener<T::Update>> = match self.listeners.get(id) {
            Some(registered) => registered.iter().map(|(_, l)| Arc::clone(l)).collect(),
            None => return,
        };
        if listeners.is_empty() {
            return;
        }

        let id = id.to_owned();
        tokio::spawn(async move {
            for listener in listeners {
                if catch_unwind(AssertUnwindSafe(|| listener(&update))).is_err() {
                    tracing::error!(entity = %id, "state listener panicked");
                }
            }
        });
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn rebuild_snapshot(&self) {
        let mut values: Vec<Arc<T>> = self.entities.iter().map(|r| Arc::clone(r.value())).collect();
        values.sort_by(|a, b| a.id().cmp(b.id()));
        // `send_modify` updates unconditionally, even with zero receivers.
        self.snapshot.send_modify(|snap| *snap = Arc::new(values));
    }
}

impl<T: Entity> Default for EntityStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

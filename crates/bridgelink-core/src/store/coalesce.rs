// ── Update coalescing ──
//
// Bursty state updates for one entity are merged into a pending buffer and
// flushed once per window. The first update for an id arms the window
// timer; later ones inside the window only merge.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::model::Merge;

/// A buffered update tagged with the window that owns it.
struct Buffered<U> {
    generation: u64,
    update: U,
}

pub(crate) struct Coalescer<U> {
    window: Duration,
    pending: Arc<DashMap<String, Buffered<U>>>,
    generation: AtomicU64,
}

impl<U> Coalescer<U>
where
    U: Merge + Send + Sync + 'static,
{
    pub(crate) fn new(window: Duration) -> Self {
        Self {
            window,
            pending: Arc::new(DashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Merge `update` into the pending buffer for `id`. When the window
    /// elapses, `flush` receives the merged update exactly once.
    pub(crate) fn push<F>(&self, id: &str, update: U, flush: F)
    where
        F: FnOnce(String, U) + Send + 'static,
    {
        match self.pending.entry(id.to_owned()) {
            Entry::Occupied(mut buffered) => buffered.get_mut().update.merge(&update),
            Entry::Vacant(slot) => {
                let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                slot.insert(Buffered { generation, update });
                let pending = Arc::clone(&self.pending);
                let window = self.window;
                let id = id.to_owned();
                tokio::spawn(async move {
                    tokio::time::sleep(window).await;
                    // A buffer opened after a clear() belongs to its own timer.
                    let flushed =
                        pending.remove_if(&id, |_, buffered| buffered.generation == generation);
                    if let Some((id, buffered)) = flushed {
                        flush(id, buffered.update);
                    }
                });
            }
        }
    }

    /// Drop everything still buffered (connection teardown).
    pub(crate) fn clear(&self) {
        self.pending.clear();
    }

    #[cfg(test)]
    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

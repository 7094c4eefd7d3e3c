// ── Domain model ──
//
// Canonical device and room types. Live state is a bag of optional fields
// so the same type serves as full state and as a partial update.

pub mod device;
pub mod room;

pub use device::{Capabilities, Device, DeviceState};
pub use room::{Room, RoomState};

/// Field-wise merge where only present values overwrite.
pub trait Merge {
    fn merge(&mut self, other: &Self);

    /// `true` when there is nothing to merge.
    fn is_empty(&self) -> bool;
}

/// An entity kept in an [`EntityStore`](crate::store::EntityStore).
pub trait Entity: Clone + Send + Sync + 'static {
    /// Partial state dispatched to listeners.
    type Update: Merge + Clone + Send + Sync + 'static;

    fn id(&self) -> &str;

    /// Fold an update into the entity's live state.
    fn apply(&mut self, update: &Self::Update);
}

/// Overwrite `dst` only when `src` carries a value.
pub(crate) fn merge_field<T: Clone>(dst: &mut Option<T>, src: Option<&T>) {
    if let Some(value) = src {
        *dst = Some(value.clone());
    }
}

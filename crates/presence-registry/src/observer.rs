//! Change notifications published by [`ClientRegistry`](crate::ClientRegistry).

use chrono::{DateTime, Utc};
use presence_core::ClientRecord;

/// Subscriber to registry changes.
///
/// Callbacks run synchronously on the thread that mutated the registry, in
/// subscription order. Every method has a no-op default so subscribers only
/// implement what they need.
pub trait RegistryObserver: Send {
    /// A record was created for a never-before-seen device.
    fn on_added(&mut self, _record: &ClientRecord) {}

    /// An existing record was updated.
    fn on_updated(&mut self, _record: &ClientRecord) {}

    /// A record was taken out of the registry.
    fn on_removed(&mut self, _record: &ClientRecord) {}

    /// A sweep run at `now` finished. `removed` holds every record the sweep
    /// took out, in removal order; subscribers may still update their
    /// emission state.
    fn on_sweep_complete(&mut self, _now: DateTime<Utc>, _removed: &mut [ClientRecord]) {}
}

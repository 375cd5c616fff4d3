//! presence-registry: Owns every live client record, keyed by device id.
//! Applies samples, sweeps silent clients, and notifies subscribers of
//! add/update/remove/sweep-complete changes.

pub mod observer;
pub mod registry;

pub use observer::RegistryObserver;
pub use registry::ClientRegistry;

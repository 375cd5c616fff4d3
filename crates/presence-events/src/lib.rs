//! presence-events: Turns registry state transitions into outbound
//! `client_in` / `client_out` / `update_nearby` messages, with per-topic
//! gating and snapshot enrichment.

pub mod audit;
pub mod category;
pub mod emitter;
pub mod manager;

pub use audit::{AuditSnapshot, EventAudit};
pub use category::{CategoryError, CategoryLookup, StaticCategoryMap};
pub use emitter::Emitter;
pub use manager::EventManager;

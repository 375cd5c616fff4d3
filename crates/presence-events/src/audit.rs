//! Running totals of client registrations and removals.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters wrap back to zero past this value.
pub const AUDIT_COUNTER_LIMIT: u64 = 1_000_000;

/// Shared counters, updated from registry notifications.
#[derive(Debug, Default)]
pub struct EventAudit {
    new_events: AtomicU64,
    remove_events: AtomicU64,
}

/// Point-in-time copy of [`EventAudit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AuditSnapshot {
    pub new_events: u64,
    pub remove_events: u64,
}

impl EventAudit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_new(&self) {
        bump(&self.new_events);
    }

    pub fn record_removed(&self) {
        bump(&self.remove_events);
    }

    pub fn snapshot(&self) -> AuditSnapshot {
        AuditSnapshot {
            new_events: self.new_events.load(Ordering::Relaxed),
            remove_events: self.remove_events.load(Ordering::Relaxed),
        }
    }
}

fn bump(counter: &AtomicU64) {
    let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
        Some(if n > AUDIT_COUNTER_LIMIT { 0 } else { n + 1 })
    });
}

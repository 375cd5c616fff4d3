//! Event manager: drives the registry and turns decisions into messages.
//!
//! The manager is the single owner of the [`ClientRegistry`]. Wrapping it in
//! one lock (the runtime uses `tokio::sync::Mutex`) serializes sample
//! ingestion, sweeps and snapshot ticks, so no operation ever sees a record
//! mid-update.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use presence_core::{ClientRecord, OutboundMessage, PresenceConfig, Sample, Topic};
use presence_registry::{ClientRegistry, RegistryObserver};
use tokio::sync::mpsc;

use crate::audit::{AuditSnapshot, EventAudit};
use crate::category::CategoryLookup;
use crate::emitter::Emitter;

// ─── Registry Subscriber ─────────────────────────────────────────────

/// Subscribed to the registry at construction: counts additions and
/// removals, and gives swept records their final departure.
struct LifecycleObserver {
    emitter: Arc<Emitter>,
    audit: Arc<EventAudit>,
}

impl RegistryObserver for LifecycleObserver {
    fn on_added(&mut self, _record: &ClientRecord) {
        self.audit.record_new();
    }

    fn on_removed(&mut self, record: &ClientRecord) {
        self.audit.record_removed();
        tracing::debug!(device_id = %record.device_id(), "client removed");
    }

    fn on_sweep_complete(&mut self, now: DateTime<Utc>, removed: &mut [ClientRecord]) {
        emit_final_departures(&self.emitter, now, removed);
    }
}

/// Send a last `client_out` for each removed record that still counts as
/// announced in. Returns the number of departures sent.
fn emit_final_departures(
    emitter: &Emitter,
    now: DateTime<Utc>,
    removed: &mut [ClientRecord],
) -> usize {
    let mut sent = 0;
    for record in removed.iter_mut() {
        if record.should_send_departure_on_removal(now)
            && emitter.client_event(Topic::ClientOut, record)
        {
            record.mark_departure_sent(now);
            tracing::info!(device_id = %record.device_id(), "final departure on removal");
            sent += 1;
        }
    }
    sent
}

// ─── Event Manager ───────────────────────────────────────────────────

#[derive(Debug)]
pub struct EventManager {
    registry: ClientRegistry,
    emitter: Arc<Emitter>,
    audit: Arc<EventAudit>,
}

impl EventManager {
    pub fn new(
        config: PresenceConfig,
        outbound: mpsc::UnboundedSender<OutboundMessage>,
        category: Option<Arc<dyn CategoryLookup>>,
    ) -> Self {
        let emitter = Arc::new(Emitter::new(config.clone(), outbound, category));
        let audit = Arc::new(EventAudit::new());
        let mut registry = ClientRegistry::new(config);
        registry.subscribe(Box::new(LifecycleObserver {
            emitter: Arc::clone(&emitter),
            audit: Arc::clone(&audit),
        }));
        Self {
            registry,
            emitter,
            audit,
        }
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    pub fn config(&self) -> &PresenceConfig {
        self.registry.config()
    }

    pub fn audit(&self) -> AuditSnapshot {
        self.audit.snapshot()
    }

    /// Ingest one sample and emit at most one arrival or departure for its
    /// device.
    ///
    /// Decisions are evaluated at the record's `last_seen`. Arrival is
    /// checked first; departure is only considered when no arrival went
    /// out. A decision is marked on the record only after the message was
    /// actually sent. Returns the topic emitted, if any.
    pub fn on_sample(&mut self, sample: Sample) -> Option<Topic> {
        let emitter = &self.emitter;
        self.registry
            .upsert_with(sample, |record| decide(emitter, record))
    }

    /// Ingest a batch in order. Returns the number of events emitted.
    pub fn on_samples(&mut self, samples: impl IntoIterator<Item = Sample>) -> usize {
        samples
            .into_iter()
            .filter_map(|sample| self.on_sample(sample))
            .count()
    }

    /// Emit a snapshot of every registered client. Nothing is sent when the
    /// registry is empty or snapshots are disabled.
    pub fn on_periodic_tick(&self, now: DateTime<Utc>) -> bool {
        self.emitter.snapshot_event(&self.registry.all(), now)
    }

    /// Remove clients silent for longer than the configured timeout.
    ///
    /// Final departures are sent through the registry's sweep-complete
    /// notification; the returned records already reflect them.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> Vec<ClientRecord> {
        let timeout = self.registry.config().abandoned_client_timeout();
        let removed = self.registry.sweep(now, timeout);
        if !removed.is_empty() {
            tracing::info!(
                removed = removed.len(),
                remaining = self.registry.len(),
                "abandoned clients removed"
            );
        }
        removed
    }

    /// Final departures for records removed outside [`EventManager::sweep`].
    ///
    /// A record that already got its final departure is skipped.
    pub fn on_sweep_complete(&self, removed: &mut [ClientRecord], now: DateTime<Utc>) -> usize {
        emit_final_departures(&self.emitter, now, removed)
    }
}

fn decide(emitter: &Emitter, record: &mut ClientRecord) -> Option<Topic> {
    let now = record.last_seen();
    if record.should_send_arrival(now) && emitter.client_event(Topic::ClientIn, record) {
        record.mark_arrival_sent(now);
        tracing::info!(device_id = %record.device_id(), "client in");
        return Some(Topic::ClientIn);
    }
    if record.should_send_departure(now) && emitter.client_event(Topic::ClientOut, record) {
        record.mark_departure_sent(now);
        tracing::info!(device_id = %record.device_id(), "client out");
        return Some(Topic::ClientOut);
    }
    None
}

// ─── Tests ───────────────────────────────────────────────────────────

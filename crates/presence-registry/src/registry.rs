//! Client registry with sweep lifecycle.
//!
//! The registry is the sole owner of [`ClientRecord`]s. Callers get borrowed
//! access for the duration of one call; read-modify-write sequences on a
//! record go through [`ClientRegistry::upsert_with`] so ingestion, decision
//! and notification happen as one step.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use presence_core::{ClientRecord, PresenceConfig, Sample};

use crate::observer::RegistryObserver;

/// Registry of live clients keyed by device id.
pub struct ClientRegistry {
    records: HashMap<String, ClientRecord>,
    observers: Vec<Box<dyn RegistryObserver>>,
    config: PresenceConfig,
}

impl fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientRegistry")
            .field("records", &self.records.len())
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl ClientRegistry {
    /// Create an empty registry. New records take their thresholds from `config`.
    pub fn new(config: PresenceConfig) -> Self {
        Self {
            records: HashMap::new(),
            observers: Vec::new(),
            config,
        }
    }

    pub fn config(&self) -> &PresenceConfig {
        &self.config
    }

    /// Append a subscriber. Subscribers are notified in subscription order.
    pub fn subscribe(&mut self, observer: Box<dyn RegistryObserver>) {
        self.observers.push(observer);
    }

    /// Get a record by device id.
    pub fn lookup(&self, device_id: &str) -> Option<&ClientRecord> {
        self.records.get(device_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All records sorted by device id.
    pub fn all(&self) -> Vec<&ClientRecord> {
        let mut records: Vec<&ClientRecord> = self.records.values().collect();
        records.sort_by(|a, b| a.device_id().cmp(b.device_id()));
        records
    }

    /// Apply a sample: create the record on first sight, otherwise ingest.
    pub fn upsert(&mut self, sample: Sample) -> &ClientRecord {
        let device_id = sample.device_id.clone();
        self.upsert_with(sample, |_| ());
        &self.records[&device_id]
    }

    /// Apply a sample, then run `decide` on the record before subscribers
    /// are notified.
    ///
    /// Fires `on_added` for a new device and `on_updated` otherwise. The
    /// notification observes the record after `decide` ran.
    pub fn upsert_with<R>(
        &mut self,
        sample: Sample,
        decide: impl FnOnce(&mut ClientRecord) -> R,
    ) -> R {
        match self.records.entry(sample.device_id.clone()) {
            Entry::Occupied(mut entry) => {
                let record = entry.get_mut();
                record.ingest_sample(sample);
                let outcome = decide(&mut *record);
                for observer in &mut self.observers {
                    observer.on_updated(record);
                }
                outcome
            }
            Entry::Vacant(entry) => {
                let record = entry.insert(ClientRecord::new(sample, &self.config));
                tracing::debug!(device_id = %record.device_id(), "client registered");
                let outcome = decide(&mut *record);
                for observer in &mut self.observers {
                    observer.on_added(record);
                }
                outcome
            }
        }
    }

    /// Remove one record, firing `on_removed`.
    pub fn remove(&mut self, device_id: &str) -> Option<ClientRecord> {
        let record = self.records.remove(device_id)?;
        for observer in &mut self.observers {
            observer.on_removed(&record);
        }
        Some(record)
    }

    /// Remove every record silent for longer than `timeout`.
    ///
    /// Fires `on_removed` per record (in device id order), then a single
    /// `on_sweep_complete` with the full removed list, which is returned.
    pub fn sweep(&mut self, now: DateTime<Utc>, timeout: TimeDelta) -> Vec<ClientRecord> {
        tracing::debug!(count = self.records.len(), "sweeping clients");

        let mut expired: Vec<String> = self
            .records
            .values()
            .filter(|record| record.should_expire_on_sweep(now, timeout))
            .map(|record| record.device_id().to_owned())
            .collect();
        expired.sort();

        let mut removed = Vec::with_capacity(expired.len());
        for device_id in expired {
            if let Some(record) = self.remove(&device_id) {
                removed.push(record);
            }
        }

        for observer in &mut self.observers {
            observer.on_sweep_complete(now, &mut removed);
        }

        tracing::debug!(
            removed = removed.len(),
            remaining = self.records.len(),
            "sweep complete"
        );
        removed
    }
}

// ─── Tests ───────────────────────────────────────────────────────────

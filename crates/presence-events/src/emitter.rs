//! Builds outbound messages and places them on the outbound channel.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use presence_core::{ClientRecord, ClientSnapshot, OutboundMessage, PresenceConfig, Topic};
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::category::CategoryLookup;

/// Gated producer of [`OutboundMessage`]s.
///
/// Every send checks the topic's enable flag first. A send never blocks:
/// the outbound channel is unbounded and a closed receiver is logged and
/// reported as "not sent".
pub struct Emitter {
    config: PresenceConfig,
    outbound: mpsc::UnboundedSender<OutboundMessage>,
    category: Option<Arc<dyn CategoryLookup>>,
}

impl fmt::Debug for Emitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter")
            .field("sender_id", &self.config.collection_point_id)
            .field("category", &self.category.is_some())
            .finish()
    }
}

impl Emitter {
    pub fn new(
        config: PresenceConfig,
        outbound: mpsc::UnboundedSender<OutboundMessage>,
        category: Option<Arc<dyn CategoryLookup>>,
    ) -> Self {
        Self {
            config,
            outbound,
            category,
        }
    }

    pub fn topic_enabled(&self, topic: Topic) -> bool {
        self.config.topic_enabled(topic)
    }

    /// Emit an arrival or departure for one record.
    ///
    /// The message is stamped with the record's `last_seen`. Returns `true`
    /// only if the message was handed to the outbound channel.
    pub fn client_event(&self, topic: Topic, record: &ClientRecord) -> bool {
        if !self.topic_enabled(topic) {
            tracing::debug!(%topic, device_id = %record.device_id(), "topic disabled");
            return false;
        }
        let extended_data = match serde_json::to_value(self.enrich(record.snapshot())) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(%topic, device_id = %record.device_id(), "snapshot encode failed: {e}");
                return false;
            }
        };
        self.send(topic, extended_data, record.last_seen())
    }

    /// Emit a snapshot of `records` under `{"nearby": {device_id: snapshot}}`.
    ///
    /// Nothing is sent for an empty set.
    pub fn snapshot_event(&self, records: &[&ClientRecord], now: DateTime<Utc>) -> bool {
        if !self.topic_enabled(Topic::UpdateNearby) || records.is_empty() {
            return false;
        }
        let mut nearby = Map::with_capacity(records.len());
        for record in records {
            match serde_json::to_value(self.enrich(record.snapshot())) {
                Ok(value) => {
                    nearby.insert(record.device_id().to_owned(), value);
                }
                Err(e) => {
                    tracing::warn!(device_id = %record.device_id(), "snapshot encode failed: {e}");
                }
            }
        }
        let mut payload = Map::with_capacity(1);
        payload.insert("nearby".to_owned(), Value::Object(nearby));
        self.send(Topic::UpdateNearby, Value::Object(payload), now)
    }

    fn enrich(&self, mut snapshot: ClientSnapshot) -> ClientSnapshot {
        if !self.config.enrich_with_category {
            return snapshot;
        }
        if let Some(lookup) = &self.category {
            snapshot.industry = lookup.category(&snapshot.beacon_id);
        }
        snapshot
    }

    fn send(&self, topic: Topic, extended_data: Value, timestamp: DateTime<Utc>) -> bool {
        let message = OutboundMessage {
            topic,
            sender_id: self.config.collection_point_id.clone(),
            sender_type: self.config.gateway_type.clone(),
            extended_data,
            timestamp,
        };
        match self.outbound.send(message) {
            Ok(()) => {
                tracing::debug!(%topic, "message queued");
                true
            }
            Err(_) => {
                tracing::warn!(%topic, "outbound channel closed, message dropped");
                false
            }
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use presence_core::Sample;

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s)
            .expect("valid timestamp")
            .with_timezone(&Utc)
    }

    fn record(device_id: &str, beacon_id: &str, at: &str) -> ClientRecord {
        let sample = Sample {
            device_id: device_id.to_owned(),
            beacon_id: beacon_id.to_owned(),
            major: 3,
            minor: 7,
            signal_strength: -60,
            tx_power: -59,
            timestamp: ts(at),
        };
        ClientRecord::new(sample, &PresenceConfig::default())
    }

    fn emitter(
        config: PresenceConfig,
        category: Option<Arc<dyn CategoryLookup>>,
    ) -> (Emitter, mpsc::UnboundedReceiver<OutboundMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Emitter::new(config, tx, category), rx)
    }

    // ── 1. Client events ──

    #[test]
    fn client_event_carries_identity_and_last_seen() {
        let (em, mut rx) = emitter(PresenceConfig::default(), None);
        let rec = record("AA01", "BEACON", "2026-03-01T09:00:00Z");
        assert!(em.client_event(Topic::ClientIn, &rec));

        let msg = rx.try_recv().expect("message queued");
        assert_eq!(msg.topic, Topic::ClientIn);
        assert_eq!(msg.sender_id, "btle1");
        assert_eq!(msg.sender_type, "proximity");
        assert_eq!(msg.timestamp, ts("2026-03-01T09:00:00Z"));
        assert_eq!(msg.extended_data["beaconMac"], "AA01");
        assert_eq!(msg.extended_data["beaconId"], "BEACON");
        assert!(msg.extended_data.get("industry").is_none());
    }

    #[test]
    fn disabled_topic_is_not_sent() {
        let config = PresenceConfig {
            send_client_out_messages: false,
            ..PresenceConfig::default()
        };
        let (em, mut rx) = emitter(config, None);
        let rec = record("AA01", "BEACON", "2026-03-01T09:00:00Z");
        assert!(!em.client_event(Topic::ClientOut, &rec));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn closed_channel_reports_not_sent() {
        let (em, rx) = emitter(PresenceConfig::default(), None);
        drop(rx);
        let rec = record("AA01", "BEACON", "2026-03-01T09:00:00Z");
        assert!(!em.client_event(Topic::ClientIn, &rec));
    }

    // ── 2. Snapshots ──

    #[test]
    fn snapshot_keys_records_by_device_id() {
        let (em, mut rx) = emitter(PresenceConfig::default(), None);
        let a = record("AA01", "BEACON", "2026-03-01T09:00:00Z");
        let b = record("BB02", "BEACON", "2026-03-01T09:00:01Z");
        let now = ts("2026-03-01T09:00:05Z");
        assert!(em.snapshot_event(&[&a, &b], now));

        let msg = rx.try_recv().expect("snapshot queued");
        assert_eq!(msg.topic, Topic::UpdateNearby);
        assert_eq!(msg.timestamp, now);
        let nearby = msg.extended_data["nearby"]
            .as_object()
            .expect("nearby object");
        assert_eq!(nearby.len(), 2);
        assert_eq!(nearby["BB02"]["beaconMac"], "BB02");
    }

    #[test]
    fn empty_snapshot_is_not_sent() {
        let (em, mut rx) = emitter(PresenceConfig::default(), None);
        assert!(!em.snapshot_event(&[], ts("2026-03-01T09:00:00Z")));
        assert!(rx.try_recv().is_err());
    }

    // ── 3. Enrichment ──

    #[test]
    fn category_applied_only_when_enabled() {
        let lookup: Arc<dyn CategoryLookup> =
            Arc::new(|id: &str| (id == "BEACON").then(|| "retail".to_owned()));
        let rec = record("AA01", "BEACON", "2026-03-01T09:00:00Z");

        let (plain, mut rx) = emitter(PresenceConfig::default(), Some(lookup.clone()));
        assert!(plain.client_event(Topic::ClientIn, &rec));
        let msg = rx.try_recv().expect("queued");
        assert!(msg.extended_data.get("industry").is_none());

        let config = PresenceConfig {
            enrich_with_category: true,
            ..PresenceConfig::default()
        };
        let (enriched, mut rx) = emitter(config, Some(lookup));
        assert!(enriched.client_event(Topic::ClientIn, &rec));
        let msg = rx.try_recv().expect("queued");
        assert_eq!(msg.extended_data["industry"], "retail");
    }
}

//! Per-device presence state machine.
//!
//! A [`ClientRecord`] classifies every reading against a hysteresis band and
//! keeps two streak counters:
//!
//! - **In range**: reading `>= rssi_client_in_threshold`. Increments the
//!   in-range streak and clears the out-of-range streak.
//! - **Out of range**: reading `< out_threshold_min`. Increments the
//!   out-of-range streak and leaves the in-range streak alone.
//! - **Dead zone**: anything in between touches neither streak.
//!
//! Arrival and departure predicates read the streaks plus the last sent
//! timestamps and are side-effect free. The caller that actually emits an
//! event reports back through `mark_arrival_sent` / `mark_departure_sent`,
//! which zero both streaks so the same streak cannot trigger twice.
//!
//! All time values are passed in as parameters (no system clock access).

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{PresenceConfig, RangeSignal};
use crate::filter::SignalFilter;
use crate::types::{PresenceState, RangeClass, Sample};

/// A swept client gets a final departure only if its last departure is older
/// than this many proximity intervals.
pub const REMOVAL_DEPARTURE_INTERVAL_FACTOR: i32 = 3;

// ─── Decision Parameters ─────────────────────────────────────────────

/// Thresholds copied out of [`PresenceConfig`] when a record is created.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Thresholds {
    in_threshold: i32,
    out_threshold_min: i32,
    in_trigger_count: u32,
    out_count_threshold: u32,
    event_interval: TimeDelta,
    range_signal: RangeSignal,
}

impl Thresholds {
    fn from_config(config: &PresenceConfig) -> Self {
        Self {
            in_threshold: config.rssi_client_in_threshold,
            out_threshold_min: config.out_threshold_min(),
            in_trigger_count: config.client_in_range_trigger_count,
            out_count_threshold: config.client_out_count_threshold,
            event_interval: config.proximity_event_interval(),
            range_signal: config.range_signal,
        }
    }
}

// ─── Client Record ───────────────────────────────────────────────────

/// Live state of one physically present (or recently present) device.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientRecord {
    device_id: String,
    gateway_type: String,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
    filter: SignalFilter,
    /// Latest sample as received.
    latest: Sample,
    in_range_streak: u32,
    out_range_streak: u32,
    last_arrival_sent_at: Option<DateTime<Utc>>,
    last_departure_sent_at: Option<DateTime<Utc>>,
    thresholds: Thresholds,
}

impl ClientRecord {
    /// Create a record from the first sample of a never-before-seen device.
    ///
    /// The first sample is ingested like any later one, so a strong first
    /// reading already counts toward the in-range streak.
    pub fn new(sample: Sample, config: &PresenceConfig) -> Self {
        let mut record = Self {
            device_id: sample.device_id.clone(),
            gateway_type: config.gateway_type.clone(),
            first_seen: sample.timestamp,
            last_seen: sample.timestamp,
            filter: SignalFilter::new(f64::from(sample.signal_strength)),
            latest: sample.clone(),
            in_range_streak: 0,
            out_range_streak: 0,
            last_arrival_sent_at: None,
            last_departure_sent_at: None,
            thresholds: Thresholds::from_config(config),
        };
        record.classify_latest();
        record
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn first_seen(&self) -> DateTime<Utc> {
        self.first_seen
    }

    pub fn last_seen(&self) -> DateTime<Utc> {
        self.last_seen
    }

    pub fn latest_sample(&self) -> &Sample {
        &self.latest
    }

    pub fn filtered_signal(&self) -> f64 {
        self.filter.estimate()
    }

    pub fn in_range_streak(&self) -> u32 {
        self.in_range_streak
    }

    pub fn out_range_streak(&self) -> u32 {
        self.out_range_streak
    }

    pub fn last_arrival_sent_at(&self) -> Option<DateTime<Utc>> {
        self.last_arrival_sent_at
    }

    pub fn last_departure_sent_at(&self) -> Option<DateTime<Utc>> {
        self.last_departure_sent_at
    }

    /// Announcement state of the current presence episode.
    pub fn presence_state(&self) -> PresenceState {
        match (self.last_arrival_sent_at, self.last_departure_sent_at) {
            (None, _) => PresenceState::NeverAnnounced,
            (Some(arrived), Some(departed)) if departed >= arrived => PresenceState::AnnouncedOut,
            (Some(_), _) => PresenceState::AnnouncedIn,
        }
    }

    // ── Ingestion ────────────────────────────────────────────────────

    /// Apply a new sample for this device and re-evaluate the streaks.
    pub fn ingest_sample(&mut self, sample: Sample) {
        debug_assert_eq!(sample.device_id, self.device_id);
        if sample.timestamp > self.last_seen {
            self.last_seen = sample.timestamp;
        }
        self.filter.update(f64::from(sample.signal_strength));
        self.latest = sample;
        self.classify_latest();
    }

    /// Classify a value against the hysteresis band.
    pub fn classify(&self, signal: f64) -> RangeClass {
        if signal >= f64::from(self.thresholds.in_threshold) {
            RangeClass::InRange
        } else if signal < f64::from(self.thresholds.out_threshold_min) {
            RangeClass::OutOfRange
        } else {
            RangeClass::DeadZone
        }
    }

    fn classify_latest(&mut self) {
        let signal = match self.thresholds.range_signal {
            RangeSignal::Raw => f64::from(self.latest.signal_strength),
            RangeSignal::Filtered => self.filter.estimate(),
        };
        let class = self.classify(signal);
        match class {
            RangeClass::InRange => {
                self.in_range_streak = self.in_range_streak.saturating_add(1);
                self.out_range_streak = 0;
            }
            RangeClass::OutOfRange => {
                self.out_range_streak = self.out_range_streak.saturating_add(1);
                // Departure not allowed right now: keep the streak bounded.
                if !self.departure_permitted(self.last_seen)
                    && self.out_range_streak > self.thresholds.out_count_threshold
                {
                    self.out_range_streak = 0;
                }
            }
            RangeClass::DeadZone => {}
        }
        tracing::debug!(
            device_id = %self.device_id,
            signal,
            ?class,
            in_streak = self.in_range_streak,
            out_streak = self.out_range_streak,
            "range classified"
        );
    }

    // ── Predicates ───────────────────────────────────────────────────

    /// Whether an arrival should be announced now.
    ///
    /// True iff the interval since the last arrival has elapsed (or none was
    /// ever sent) and the in-range streak exceeds the trigger count.
    pub fn should_send_arrival(&self, now: DateTime<Utc>) -> bool {
        let interval_ok = match self.last_arrival_sent_at {
            None => true,
            Some(arrived) => now.signed_duration_since(arrived) >= self.thresholds.event_interval,
        };
        interval_ok && self.in_range_streak > self.thresholds.in_trigger_count
    }

    /// Whether a departure should be announced now.
    ///
    /// Requires an arrival in the current episode, no departure since it,
    /// the departure interval to have elapsed, and a long enough
    /// out-of-range streak.
    pub fn should_send_departure(&self, now: DateTime<Utc>) -> bool {
        self.departure_permitted(now)
            && self.out_range_streak >= self.thresholds.out_count_threshold
    }

    fn departure_permitted(&self, now: DateTime<Utc>) -> bool {
        let Some(arrived) = self.last_arrival_sent_at else {
            return false;
        };
        match self.last_departure_sent_at {
            None => true,
            Some(departed) if departed >= arrived => false,
            Some(departed) => {
                now.signed_duration_since(departed) >= self.thresholds.event_interval
            }
        }
    }

    /// Whether a record being removed should get one last departure.
    pub fn should_send_departure_on_removal(&self, now: DateTime<Utc>) -> bool {
        let Some(arrived) = self.last_arrival_sent_at else {
            return false;
        };
        match self.last_departure_sent_at {
            None => true,
            Some(departed) => {
                arrived > departed
                    && now.signed_duration_since(departed)
                        > self.thresholds.event_interval * REMOVAL_DEPARTURE_INTERVAL_FACTOR
            }
        }
    }

    /// Whether the device has been silent for longer than `timeout`.
    pub fn should_expire_on_sweep(&self, now: DateTime<Utc>, timeout: TimeDelta) -> bool {
        now.signed_duration_since(self.last_seen) > timeout
    }

    // ── Emission bookkeeping ─────────────────────────────────────────

    /// Record that an arrival was emitted at `at`.
    pub fn mark_arrival_sent(&mut self, at: DateTime<Utc>) {
        self.last_arrival_sent_at = Some(at);
        self.zero_streaks();
    }

    /// Record that a departure was emitted at `at`.
    pub fn mark_departure_sent(&mut self, at: DateTime<Utc>) {
        self.last_departure_sent_at = Some(at);
        self.zero_streaks();
    }

    fn zero_streaks(&mut self) {
        self.in_range_streak = 0;
        self.out_range_streak = 0;
    }

    // ── Reporting ────────────────────────────────────────────────────

    /// Read-only projection for outbound reporting.
    pub fn snapshot(&self) -> ClientSnapshot {
        ClientSnapshot {
            gateway_type: self.gateway_type.clone(),
            first_registered_time: self.first_seen,
            last_registered_time: self.last_seen,
            prev_client_in_msg_time: self.last_arrival_sent_at,
            prev_client_out_msg_time: self.last_departure_sent_at,
            time_in_collection_point_in_milliseconds: self
                .last_seen
                .signed_duration_since(self.first_seen)
                .num_milliseconds(),
            rssi: self.latest.signal_strength,
            average_rssi: self.latest.signal_strength,
            filtered_rssi: self.filter.estimate(),
            tx_power: self.latest.tx_power,
            beacon_id: self.latest.beacon_id.clone(),
            beacon_mac: self.device_id.clone(),
            major: self.latest.major,
            minor: self.latest.minor,
            presence: self.presence_state(),
            industry: None,
        }
    }
}

// ─── Snapshot ────────────────────────────────────────────────────────

/// Serializable view of a [`ClientRecord`], sent as `extended_data`.
///
/// Timestamps serialize as RFC 3339 / ISO-8601 strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientSnapshot {
    pub gateway_type: String,
    pub first_registered_time: DateTime<Utc>,
    pub last_registered_time: DateTime<Utc>,
    pub prev_client_in_msg_time: Option<DateTime<Utc>>,
    pub prev_client_out_msg_time: Option<DateTime<Utc>>,
    pub time_in_collection_point_in_milliseconds: i64,
    pub rssi: i32,
    pub average_rssi: i32,
    pub filtered_rssi: f64,
    pub tx_power: i32,
    pub beacon_id: String,
    pub beacon_mac: String,
    pub major: u16,
    pub minor: u16,
    pub presence: PresenceState,
    /// Beacon category, when enrichment is enabled and the beacon is known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub industry: Option<String>,
}

// ─── Tests ───────────────────────────────────────────────────────────


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T09:00:00Z")
            .expect("valid RFC3339")
            .with_timezone(&Utc)
    }

    fn sample(rssi: i32, at: DateTime<Utc>) -> Sample {
        Sample {
            device_id: "AA".to_owned(),
            beacon_id: "BB".to_owned(),
            major: 0,
            minor: 0,
            signal_strength: rssi,
            tx_power: 0,
            timestamp: at,
        }
    }

    proptest! {
        /// Readings alternating around the in threshold never produce more
        /// than one arrival per proximity interval.
        #[test]
        fn alternating_boundary_readings_do_not_flap(
            threshold in -90i32..-40,
            trigger in 0u32..4,
            interval_ms in 1_000u64..20_000,
            step_ms in 10i64..2_000,
            count in 10usize..200,
        ) {
            let config = PresenceConfig {
                rssi_client_in_threshold: threshold,
                client_in_range_trigger_count: trigger,
                proximity_event_interval_ms: interval_ms,
                ..PresenceConfig::default()
            };
            let interval = config.proximity_event_interval();
            let mut record = ClientRecord::new(sample(threshold + 1, t0()), &config);
            let mut arrivals: Vec<DateTime<Utc>> = Vec::new();
            for i in 1..count {
                let at = t0() + TimeDelta::milliseconds(step_ms * i as i64);
                let rssi = if i % 2 == 0 { threshold + 1 } else { threshold - 1 };
                record.ingest_sample(sample(rssi, at));
                if record.should_send_arrival(at) {
                    record.mark_arrival_sent(at);
                    arrivals.push(at);
                }
            }
            for pair in arrivals.windows(2) {
                prop_assert!(pair[1].signed_duration_since(pair[0]) >= interval);
            }
        }

        /// Fewer than trigger+1 in-range readings never allow an arrival.
        #[test]
        fn arrival_requires_streak(trigger in 0u32..8, extra in 0u32..8) {
            let config = PresenceConfig {
                client_in_range_trigger_count: trigger,
                ..PresenceConfig::default()
            };
            let mut record = ClientRecord::new(sample(-50, t0()), &config);
            for i in 1..=trigger {
                prop_assert!(!record.should_send_arrival(t0()), "streak {} <= {}", i, trigger);
                record.ingest_sample(sample(-50, t0() + TimeDelta::seconds(i64::from(i))));
            }
            // Streak now trigger + 1.
            prop_assert!(record.should_send_arrival(t0()));
            for i in 0..extra {
                record.ingest_sample(sample(-50, t0() + TimeDelta::seconds(100 + i64::from(i))));
            }
            prop_assert!(record.should_send_arrival(t0()));
        }

        /// A record that never announced an arrival never departs.
        #[test]
        fn no_departure_before_arrival(
            readings in proptest::collection::vec(-120i32..-30, 1..100),
        ) {
            let config = PresenceConfig::default();
            let mut record = ClientRecord::new(sample(readings[0], t0()), &config);
            for (i, rssi) in readings.iter().enumerate() {
                let at = t0() + TimeDelta::seconds(i as i64);
                record.ingest_sample(sample(*rssi, at));
                prop_assert!(!record.should_send_departure(at));
                prop_assert!(record.out_range_streak() <= config.client_out_count_threshold);
            }
        }
    }
}

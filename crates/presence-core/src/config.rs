//! Collection point configuration.
//!
//! Values are read from a TOML file; every key is optional and falls back to
//! the defaults below. `validate()` is called by [`PresenceConfig::load`] and
//! [`PresenceConfig::from_toml`] so a returned config is always usable.

use std::path::Path;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::Topic;

// ─── Defaults ────────────────────────────────────────────────────────

const DEFAULT_PROXIMITY_EVENT_INTERVAL_MS: u64 = 5_000;
const DEFAULT_LEAVE_TIME_MS: u64 = 1_500;
const DEFAULT_CLEANUP_INTERVAL_MS: u64 = 300_000;
const DEFAULT_CLIENT_TIMEOUT_MS: u64 = 120_000;
const DEFAULT_RSSI_CLIENT_IN_THRESHOLD: i32 = -68;
const DEFAULT_RSSI_ERROR_VARIANCE: f64 = 0.12;
const DEFAULT_CLIENT_OUT_COUNT_THRESHOLD: u32 = 5;
const DEFAULT_CLIENT_IN_RANGE_TRIGGER_COUNT: u32 = 1;
const DEFAULT_UPDATE_FPS: u32 = 30;
const DEFAULT_ADVERTISING_MAX: u16 = 9_999;

/// Upper bound on snapshot frequency; keeps the tick period at 1 ms or more.
pub const MAX_UPDATE_FPS: u32 = 1_000;
/// Upper bound on the sweep period (one day).
pub const MAX_CLEANUP_INTERVAL_MS: u64 = 86_400_000;

/// Which value the range classifier compares against the thresholds.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RangeSignal {
    /// The reading as received.
    #[default]
    Raw,
    /// The smoothed estimate after this reading.
    Filtered,
}

/// Tunables for one collection point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    /// Identifier reported as `sender_id` on outbound messages.
    pub collection_point_id: String,
    /// Reported as `sender_type` and `gatewayType`.
    pub gateway_type: String,

    /// Minimum spacing between two arrivals (and two departures) of one client.
    pub proximity_event_interval_ms: u64,
    /// Reserved. Parsed and validated, not consulted by the decision logic.
    pub leave_time_ms: u64,
    /// Period of the registry sweep.
    pub abandoned_client_cleanup_interval_ms: u64,
    /// Silence after which a client is swept.
    pub abandoned_client_timeout_ms: u64,

    /// Readings at or above this dBm value count as in range.
    pub rssi_client_in_threshold: i32,
    /// Width of the hysteresis band as a fraction of the in threshold.
    pub rssi_error_variance: f64,
    /// Out-of-range streak required for a departure.
    pub client_out_count_threshold: u32,
    /// In-range streak must exceed this for an arrival.
    pub client_in_range_trigger_count: u32,
    pub range_signal: RangeSignal,

    pub send_client_in_messages: bool,
    pub send_client_out_messages: bool,
    pub send_update_messages: bool,
    /// Snapshot messages per second.
    pub update_fps: u32,

    /// Inclusive major number window; advertisements outside are ignored.
    pub advertising_major_min: u16,
    pub advertising_major_max: u16,
    pub advertising_minor_min: u16,
    pub advertising_minor_max: u16,

    /// Attach the beacon category (`industry`) to snapshots.
    pub enrich_with_category: bool,
    /// Pause before the first advertisement is consumed.
    pub startup_delay_ms: u64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            collection_point_id: "btle1".to_owned(),
            gateway_type: "proximity".to_owned(),
            proximity_event_interval_ms: DEFAULT_PROXIMITY_EVENT_INTERVAL_MS,
            leave_time_ms: DEFAULT_LEAVE_TIME_MS,
            abandoned_client_cleanup_interval_ms: DEFAULT_CLEANUP_INTERVAL_MS,
            abandoned_client_timeout_ms: DEFAULT_CLIENT_TIMEOUT_MS,
            rssi_client_in_threshold: DEFAULT_RSSI_CLIENT_IN_THRESHOLD,
            rssi_error_variance: DEFAULT_RSSI_ERROR_VARIANCE,
            client_out_count_threshold: DEFAULT_CLIENT_OUT_COUNT_THRESHOLD,
            client_in_range_trigger_count: DEFAULT_CLIENT_IN_RANGE_TRIGGER_COUNT,
            range_signal: RangeSignal::Raw,
            send_client_in_messages: true,
            send_client_out_messages: true,
            send_update_messages: true,
            update_fps: DEFAULT_UPDATE_FPS,
            advertising_major_min: 0,
            advertising_major_max: DEFAULT_ADVERTISING_MAX,
            advertising_minor_min: 0,
            advertising_minor_max: DEFAULT_ADVERTISING_MAX,
            enrich_with_category: false,
            startup_delay_ms: 0,
        }
    }
}

impl PresenceConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&content)?;
        tracing::info!(
            path = %path.display(),
            collection_point_id = %config.collection_point_id,
            "config loaded"
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.update_fps == 0 || self.update_fps > MAX_UPDATE_FPS {
            return Err(ConfigError::Invalid(format!(
                "update_fps must be within 1..={MAX_UPDATE_FPS}, got {}",
                self.update_fps
            )));
        }
        if self.proximity_event_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "proximity_event_interval_ms must be > 0".to_owned(),
            ));
        }
        if self.abandoned_client_cleanup_interval_ms == 0
            || self.abandoned_client_cleanup_interval_ms > MAX_CLEANUP_INTERVAL_MS
        {
            return Err(ConfigError::Invalid(format!(
                "abandoned_client_cleanup_interval_ms must be within 1..={MAX_CLEANUP_INTERVAL_MS}, got {}",
                self.abandoned_client_cleanup_interval_ms
            )));
        }
        if self.abandoned_client_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "abandoned_client_timeout_ms must be > 0".to_owned(),
            ));
        }
        if self.rssi_client_in_threshold >= 0 {
            return Err(ConfigError::Invalid(format!(
                "rssi_client_in_threshold must be negative dBm, got {}",
                self.rssi_client_in_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.rssi_error_variance) {
            return Err(ConfigError::Invalid(format!(
                "rssi_error_variance must be within [0, 1], got {}",
                self.rssi_error_variance
            )));
        }
        if self.advertising_major_min > self.advertising_major_max {
            return Err(ConfigError::Invalid(
                "advertising_major_min exceeds advertising_major_max".to_owned(),
            ));
        }
        if self.advertising_minor_min > self.advertising_minor_max {
            return Err(ConfigError::Invalid(
                "advertising_minor_min exceeds advertising_minor_max".to_owned(),
            ));
        }
        Ok(())
    }

    /// Lower edge of the hysteresis band:
    /// `trunc(in_threshold + in_threshold * rssi_error_variance)`.
    pub fn out_threshold_min(&self) -> i32 {
        let threshold = f64::from(self.rssi_client_in_threshold);
        (threshold + threshold * self.rssi_error_variance) as i32
    }

    pub fn proximity_event_interval(&self) -> TimeDelta {
        millis(self.proximity_event_interval_ms)
    }

    pub fn abandoned_client_timeout(&self) -> TimeDelta {
        millis(self.abandoned_client_timeout_ms)
    }

    pub fn cleanup_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.abandoned_client_cleanup_interval_ms)
    }

    /// Period between two snapshot ticks.
    pub fn update_period(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(1.0 / f64::from(self.update_fps.max(1)))
    }

    /// Whether a decoded advertisement falls inside the major/minor window.
    pub fn accepts_beacon(&self, major: u16, minor: u16) -> bool {
        (self.advertising_major_min..=self.advertising_major_max).contains(&major)
            && (self.advertising_minor_min..=self.advertising_minor_max).contains(&minor)
    }

    /// Whether messages for `topic` are enabled.
    pub fn topic_enabled(&self, topic: Topic) -> bool {
        match topic {
            Topic::ClientIn => self.send_client_in_messages,
            Topic::ClientOut => self.send_client_out_messages,
            Topic::UpdateNearby => self.send_update_messages,
        }
    }
}

fn millis(ms: u64) -> TimeDelta {
    TimeDelta::milliseconds(i64::try_from(ms).unwrap_or(i64::MAX))
}

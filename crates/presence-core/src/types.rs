//! Shared domain and wire types: samples, topics, outbound messages and
//! presence states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

// ─── Sample ───────────────────────────────────────────────────────

/// One radio observation of a beacon, produced by an advertisement source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Stable device key (radio MAC, upper-case hex).
    pub device_id: String,
    /// Beacon proximity UUID (upper-case hex).
    pub beacon_id: String,
    pub major: u16,
    pub minor: u16,
    /// Received signal strength in dBm (negative).
    pub signal_strength: i32,
    /// Calibrated transmit power advertised by the beacon.
    pub tx_power: i32,
    pub timestamp: DateTime<Utc>,
}

// ─── Topic ────────────────────────────────────────────────────────

/// Outbound message kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    /// A client has begun being considered present.
    ClientIn,
    /// A client has stopped being considered present.
    ClientOut,
    /// Periodic snapshot of every registered client.
    UpdateNearby,
}

impl Topic {
    pub const ALL: [Self; 3] = [Self::ClientIn, Self::ClientOut, Self::UpdateNearby];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClientIn => "client_in",
            Self::ClientOut => "client_out",
            Self::UpdateNearby => "update_nearby",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topic {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "client_in" => Ok(Self::ClientIn),
            "client_out" => Ok(Self::ClientOut),
            "update_nearby" => Ok(Self::UpdateNearby),
            _ => Err(ConfigError::Invalid(format!("unknown topic: {s}"))),
        }
    }
}

// ─── Outbound Message ─────────────────────────────────────────────

/// Message handed to the outbound transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    pub topic: Topic,
    /// Collection point that observed the event.
    pub sender_id: String,
    /// Gateway type of the collection point (e.g. "proximity").
    pub sender_type: String,
    pub extended_data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

// ─── Presence State ───────────────────────────────────────────────

/// Announcement state of a client within its current presence episode.
///
/// Derived from the arrival/departure timestamps, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceState {
    NeverAnnounced,
    AnnouncedIn,
    AnnouncedOut,
}

impl PresenceState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NeverAnnounced => "never_announced",
            Self::AnnouncedIn => "announced_in",
            Self::AnnouncedOut => "announced_out",
        }
    }
}

impl fmt::Display for PresenceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a single reading against the hysteresis band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RangeClass {
    InRange,
    /// Between the out threshold and the in threshold: touches no streak.
    DeadZone,
    OutOfRange,
}

//! iBeacon advertisement decoding.
//!
//! Payload layout (offsets into the advertisement data):
//!
//! | bytes    | field                         |
//! |----------|-------------------------------|
//! | `0..9`   | flags + manufacturer header   |
//! | `9..25`  | proximity UUID                |
//! | `25..27` | major (big endian)            |
//! | `27..29` | minor (big endian)            |
//! | `29`     | calibrated tx power (signed)  |

use chrono::{DateTime, Utc};
use presence_core::{PresenceConfig, Sample};
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

/// Shortest payload that carries every iBeacon field.
pub const IBEACON_MIN_LEN: usize = 30;

const SENDER_LEN: usize = 6;

/// One scan response as delivered by the radio layer.
///
/// `sender` and `data` are hex strings; `:`, `-` and spaces are ignored.
/// `sender` is in radio byte order (least significant byte first).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawAdvertisement {
    pub sender: String,
    pub rssi: i32,
    pub data: String,
    /// Observation time; the receive time is used when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Decode one advertisement into a [`Sample`].
///
/// Returns `Ok(None)` for a well-formed advertisement whose major/minor
/// falls outside the configured window.
pub fn decode(
    adv: &RawAdvertisement,
    config: &PresenceConfig,
    received_at: DateTime<Utc>,
) -> Result<Option<Sample>, DecodeError> {
    let data = parse_hex("data", &adv.data)?;
    if data.len() < IBEACON_MIN_LEN {
        return Err(DecodeError::TooShort {
            len: data.len(),
            min: IBEACON_MIN_LEN,
        });
    }
    let sender = parse_hex("sender", &adv.sender)?;
    if sender.len() != SENDER_LEN {
        return Err(DecodeError::BadSender(sender.len()));
    }

    let major = u16::from_be_bytes([data[25], data[26]]);
    let minor = u16::from_be_bytes([data[27], data[28]]);
    if !config.accepts_beacon(major, minor) {
        tracing::trace!(major, minor, "advertisement outside beacon window");
        return Ok(None);
    }

    let device_id: String = sender.iter().rev().map(|b| format!("{b:02X}")).collect();
    Ok(Some(Sample {
        device_id,
        beacon_id: to_upper_hex(&data[9..25]),
        major,
        minor,
        signal_strength: adv.rssi,
        tx_power: i32::from(data[29] as i8),
        timestamp: adv.timestamp.unwrap_or(received_at),
    }))
}

fn to_upper_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02X}")).collect()
}

fn parse_hex(field: &'static str, value: &str) -> Result<Vec<u8>, DecodeError> {
    let invalid = || DecodeError::InvalidHex {
        field,
        value: value.to_owned(),
    };
    let digits: Vec<u8> = value
        .bytes()
        .filter(|b| !matches!(b, b':' | b'-' | b' '))
        .collect();
    if digits.len() % 2 != 0 {
        return Err(invalid());
    }
    digits
        .chunks(2)
        .map(|pair| -> Result<u8, DecodeError> {
            let hi = (pair[0] as char).to_digit(16).ok_or_else(invalid)?;
            let lo = (pair[1] as char).to_digit(16).ok_or_else(invalid)?;
            Ok((hi * 16 + lo) as u8)
        })
        .collect()
}

// ─── Tests ───────────────────────────────────────────────────────────

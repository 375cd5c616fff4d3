//! presence-core: Pure presence decision logic for beacon sightings.
//! Signal smoothing, the per-client arrival/departure state machine,
//! configuration and shared wire types. No IO beyond config file reads,
//! no async.

pub mod client;
pub mod config;
pub mod error;
pub mod filter;
pub mod types;

pub use client::{ClientRecord, ClientSnapshot};
pub use config::{PresenceConfig, RangeSignal};
pub use error::ConfigError;
pub use filter::SignalFilter;
pub use types::{OutboundMessage, PresenceState, RangeClass, Sample, Topic};

//! presence-source-ibeacon: iBeacon advertisement decoding and the
//! advertisement source seam feeding the presence engine.

pub mod decode;
pub mod error;
pub mod source;

pub use decode::{IBEACON_MIN_LEN, RawAdvertisement, decode};
pub use error::{DecodeError, SourceError};
pub use source::{AdvertisementSource, NdjsonSource};

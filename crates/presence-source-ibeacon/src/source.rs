//! Advertisement sources.
//!
//! A source is the only part of the pipeline that touches the radio (or a
//! recording of it). Reads are blocking; the runtime drives a source from a
//! blocking task and forwards decoded samples over a channel.

use std::io::BufRead;

use crate::decode::RawAdvertisement;
use crate::error::SourceError;

/// Blocking producer of raw advertisements.
pub trait AdvertisementSource: Send {
    /// Next advertisement, or `Ok(None)` at end of stream.
    ///
    /// `SourceError::Malformed` covers one bad record; the caller may keep
    /// reading. `SourceError::Unavailable` is retryable.
    fn next_advertisement(&mut self) -> Result<Option<RawAdvertisement>, SourceError>;
}

/// Replays newline-delimited JSON advertisements from any reader.
///
/// Blank lines are skipped.
#[derive(Debug)]
pub struct NdjsonSource<R> {
    reader: R,
    line: String,
    line_no: u64,
}

impl<R: BufRead> NdjsonSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: String::new(),
            line_no: 0,
        }
    }
}

impl<R: BufRead + Send> AdvertisementSource for NdjsonSource<R> {
    fn next_advertisement(&mut self) -> Result<Option<RawAdvertisement>, SourceError> {
        loop {
            self.line.clear();
            if self.reader.read_line(&mut self.line)? == 0 {
                return Ok(None);
            }
            self.line_no += 1;
            let trimmed = self.line.trim();
            if trimmed.is_empty() {
                continue;
            }
            return serde_json::from_str(trimmed)
                .map(Some)
                .map_err(|e| SourceError::Malformed(format!("line {}: {e}", self.line_no)));
        }
    }
}

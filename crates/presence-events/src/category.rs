//! Beacon category lookup used to decorate snapshots.

use std::collections::HashMap;
use std::path::Path;

use thiserror::Error;

/// Maps a beacon id to a category label (reported as `industry`).
pub trait CategoryLookup: Send + Sync {
    fn category(&self, beacon_id: &str) -> Option<String>;
}

impl<F> CategoryLookup for F
where
    F: Fn(&str) -> Option<String> + Send + Sync,
{
    fn category(&self, beacon_id: &str) -> Option<String> {
        self(beacon_id)
    }
}

#[derive(Debug, Error)]
pub enum CategoryError {
    #[error("category map io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("category map parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Static table loaded from a TOML document of `beacon_id = "category"` pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticCategoryMap {
    entries: HashMap<String, String>,
}

impl StaticCategoryMap {
    pub fn from_toml(s: &str) -> Result<Self, CategoryError> {
        let raw: HashMap<String, String> = toml::from_str(s)?;
        let entries = raw
            .into_iter()
            .map(|(k, v)| (k.to_ascii_uppercase(), v))
            .collect();
        Ok(Self { entries })
    }

    pub fn load(path: &Path) -> Result<Self, CategoryError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CategoryLookup for StaticCategoryMap {
    fn category(&self, beacon_id: &str) -> Option<String> {
        self.entries.get(&beacon_id.to_ascii_uppercase()).cloned()
    }
}

//! Session configuration document
//!
//! Persists user choices (overrides, selections, notes, safety buffer) as a
//! versioned JSON document. Every field except `version` is optional.

use std::{collections::BTreeMap, fs::File, io, path::Path};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CONFIG_VERSION: u32 = 1;

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// (image key, percentage) pairs.
    #[serde(default)]
    pub overrides: Vec<(String, f32)>,
    /// Composite `skeleton/animation/image` keys excluded from global maxima.
    #[serde(default)]
    pub local_overrides: Vec<String>,
    #[serde(default)]
    pub selections: Vec<String>,
    #[serde(default)]
    pub track_list: Vec<String>,
    #[serde(default)]
    pub skin_docs: BTreeMap<String, String>,
    #[serde(default)]
    pub event_docs: BTreeMap<String, String>,
    #[serde(default)]
    pub bone_docs: BTreeMap<String, String>,
    #[serde(default)]
    pub general_notes: String,
    #[serde(default)]
    pub safety_buffer: f32,
}

impl SessionConfig {
    pub fn new() -> Self {
        Self {
            version: CONFIG_VERSION,
            ..Self::default()
        }
    }
}

/// Error type for config persistence
#[derive(Debug)]
pub enum ConfigError {
    Io(io::Error),
    Json(serde_json::Error),
}

impl From<io::Error> for ConfigError {
    fn from(err: io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Json(err)
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "I/O error: {}", err),
            ConfigError::Json(err) => write!(f, "JSON error: {}", err),
        }
    }
}

pub fn load_config(path: &Path) -> Result<SessionConfig, ConfigError> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(file)?)
}

/// Saves the config with a fresh timestamp.
pub fn save_config(config: &SessionConfig, path: &Path) -> Result<(), ConfigError> {
    let mut stamped = config.clone();
    stamped.timestamp = Some(Utc::now());
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, &stamped)?;
    Ok(())
}

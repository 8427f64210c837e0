//! User-editable sync configuration, persisted as TOML
//!
//! ```toml
//! relays = ["wss://relay.damus.io", "wss://nos.lol"]
//! query_timeout_secs = 10
//! publish_timeout_secs = 10
//!
//! [privacy]
//! share_tags_publicly = true
//! share_values_publicly = false
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{SyncError, SyncResult};

/// File name of the config inside the data directory
pub const CONFIG_FILE_NAME: &str = "notesync.toml";

/// Relays used when no config exists yet
pub const DEFAULT_RELAYS: &[&str] = &["wss://relay.damus.io", "wss://nos.lol"];

/// Controls what a *public* note envelope reveals. Encrypted envelopes
/// always carry the full note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrivacySettings {
    pub share_tags_publicly: bool,
    pub share_values_publicly: bool,
}

impl Default for PrivacySettings {
    fn default() -> Self {
        Self {
            share_tags_publicly: true,
            share_values_publicly: false,
        }
    }
}

/// Relay endpoints, timeouts and privacy flags
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub relays: Vec<String>,
    pub query_timeout_secs: u64,
    pub publish_timeout_secs: u64,
    pub privacy: PrivacySettings,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            relays: DEFAULT_RELAYS.iter().map(|r| r.to_string()).collect(),
            query_timeout_secs: 10,
            publish_timeout_secs: 10,
            privacy: PrivacySettings::default(),
        }
    }
}

impl SyncConfig {
    /// Load from `path`, writing the defaults there first if it does not exist.
    pub fn load_or_create(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            let config = Self::default();
            config.save(path)?;
            info!(path = %path.display(), "Created default config");
            return Ok(config);
        }
        Self::load(path)
    }

    /// Load and validate.
    pub fn load(path: impl AsRef<Path>) -> SyncResult<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&contents)
            .map_err(|e| SyncError::Config(format!("Invalid config: {}", e)))?;
        config.validate()?;
        debug!(relays = config.relays.len(), "Config loaded");
        Ok(config)
    }

    /// Write as pretty TOML, creating the parent directory if needed.
    pub fn save(&self, path: impl AsRef<Path>) -> SyncResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|e| SyncError::Config(format!("Failed to encode config: {}", e)))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn validate(&self) -> SyncResult<()> {
        if self.query_timeout_secs == 0 || self.publish_timeout_secs == 0 {
            return Err(SyncError::Config(
                "timeouts must be greater than 0".to_string(),
            ));
        }
        for relay in &self.relays {
            validate_relay_url(relay)?;
        }
        Ok(())
    }

    /// Append a relay. Rejects duplicates and non-WebSocket URIs.
    pub fn add_relay(&mut self, url: &str) -> SyncResult<()> {
        let url = url.trim();
        validate_relay_url(url)?;
        if self.relays.iter().any(|r| r == url) {
            return Err(SyncError::Config(format!("Relay already configured: {}", url)));
        }
        self.relays.push(url.to_string());
        Ok(())
    }

    /// Remove a relay; returns whether it was present.
    pub fn remove_relay(&mut self, url: &str) -> bool {
        let before = self.relays.len();
        self.relays.retain(|r| r != url.trim());
        self.relays.len() != before
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_secs(self.publish_timeout_secs)
    }
}

fn validate_relay_url(url: &str) -> SyncResult<()> {
    let rest = url
        .strip_prefix("wss://")
        .or_else(|| url.strip_prefix("ws://"))
        .ok_or_else(|| SyncError::Config(format!("Relay must be ws:// or wss://: {}", url)))?;
    if rest.is_empty() || rest.contains(char::is_whitespace) {
        return Err(SyncError::Config(format!("Invalid relay URL: {}", url)));
    }
    Ok(())
}

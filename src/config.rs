//! Configuration file parser for `feedsync.toml`.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are ignored by serde, though a warning is logged for each
//! so typos do not go unnoticed.
use secrecy::SecretString;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::feed::FetchOptions;
use crate::sync::SyncOptions;

/// Environment variable that overrides `metadata_api_secret`
pub const SECRET_ENV_VAR: &str = "METADATA_API_SECRET";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration
// ============================================================================

/// Engine configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// The metadata secret is masked in `Debug` output.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database file (`:memory:` for a throwaway store).
    pub database_path: String,

    /// Seconds between scheduler sweeps.
    pub refresh_interval_secs: u64,

    /// A feed not updated for this many seconds is due for refresh.
    pub stale_after_secs: u64,

    /// Lifetime of a per-feed update lock.
    pub lock_ttl_secs: u64,

    /// Feed updates running at once during a sweep.
    pub max_concurrent_updates: usize,

    /// Timeout for each outbound request.
    pub fetch_timeout_secs: u64,

    /// Base URL of the article metadata service; enrichment is off without it.
    pub metadata_api_url: Option<String>,

    /// Shared secret for the metadata service (alternative to the
    /// `METADATA_API_SECRET` env var, which takes precedence).
    pub metadata_api_secret: Option<String>,

    /// Permit fetching loopback and private-network hosts.
    pub allow_private_hosts: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: "feedsync.db".to_string(),
            refresh_interval_secs: 600,
            stale_after_secs: 2 * 60 * 60,
            lock_ttl_secs: 30,
            max_concurrent_updates: 10,
            fetch_timeout_secs: 30,
            metadata_api_url: None,
            metadata_api_secret: None,
            allow_private_hosts: false,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("database_path", &self.database_path)
            .field("refresh_interval_secs", &self.refresh_interval_secs)
            .field("stale_after_secs", &self.stale_after_secs)
            .field("lock_ttl_secs", &self.lock_ttl_secs)
            .field("max_concurrent_updates", &self.max_concurrent_updates)
            .field("fetch_timeout_secs", &self.fetch_timeout_secs)
            .field("metadata_api_url", &self.metadata_api_url)
            .field(
                "metadata_api_secret",
                &self.metadata_api_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("allow_private_hosts", &self.allow_private_hosts)
            .finish()
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 9] = [
        "database_path",
        "refresh_interval_secs",
        "stale_after_secs",
        "lock_ttl_secs",
        "max_concurrent_updates",
        "fetch_timeout_secs",
        "metadata_api_url",
        "metadata_api_secret",
        "allow_private_hosts",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check size before reading so a huge file is never pulled into memory
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            database = %config.database_path,
            enrichment = config.metadata_api_url.is_some(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Runtime options for [`crate::sync::FeedSync`].
    ///
    /// Zero intervals, lock lifetimes and pool sizes are raised to 1.
    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            lock_ttl: Duration::from_secs(self.lock_ttl_secs.max(1)),
            fetch: FetchOptions {
                timeout: Duration::from_secs(self.fetch_timeout_secs.max(1)),
                allow_private_hosts: self.allow_private_hosts,
            },
            max_concurrent_updates: self.max_concurrent_updates.max(1),
            refresh_interval: Duration::from_secs(self.refresh_interval_secs.max(1)),
            stale_after: Duration::from_secs(self.stale_after_secs),
        }
    }

    /// The metadata service secret, env var first.
    pub fn metadata_secret(&self) -> Option<SecretString> {
        self.resolve_secret(std::env::var(SECRET_ENV_VAR).ok())
    }

    fn resolve_secret(&self, from_env: Option<String>) -> Option<SecretString> {
        from_env
            .filter(|s| !s.is_empty())
            .or_else(|| self.metadata_api_secret.clone())
            .map(SecretString::from)
    }
}

// ============================================================================
// Tests
// ============================================================================

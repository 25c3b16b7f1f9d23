//! Worker configuration management.
//!
//! This module handles loading and saving the worker configuration: the
//! cache version, the origin the worker fronts, the install-time seed list,
//! the API prefix that selects network-only routing, and the defaults used
//! for push notifications and background sync.
//!
//! Configuration is stored at `~/.config/shellcache/config.json`. Every field
//! has a default, so a missing file yields a working configuration.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::FetchError;
use crate::http::Request;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "shellcache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment variable overriding the configured origin
pub const ORIGIN_ENV: &str = "SHELLCACHE_ORIGIN";

/// Default local origin the shell points its client surface at
const DEFAULT_ORIGIN: &str = "http://127.0.0.1:5000/";

/// HTTP request timeout in seconds.
/// 30s allows for slow origin responses while failing fast enough to fall
/// back to the cache.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Cache name prefix; the generation name is `<prefix>-v<version>`
    pub cache_prefix: String,
    /// Release version tying the cache generation to a build
    pub version: String,
    /// Origin server the client surface loads
    pub origin: String,
    /// Registered scope path, relative to the origin
    pub scope: String,
    /// Resource paths populated at install time, in order
    pub seed_keys: Vec<String>,
    /// Requests whose path contains this prefix are routed network-only
    pub api_prefix: String,
    /// Cached entry served when both the cache and the network miss
    pub fallback_key: String,
    /// Sync tag that triggers the snapshot refresh
    pub sync_tag: String,
    /// Endpoint fetched by the snapshot sync task
    pub sync_endpoint: String,
    pub request_timeout_secs: u64,
    /// Activate right after install instead of waiting for clients to close
    pub skip_waiting: bool,
    pub notifications: NotificationDefaults,
}

/// Fields a push notification falls back to when the payload omits them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NotificationDefaults {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub tag: String,
    /// Vibration pattern in milliseconds (on, off, on, ...)
    pub vibrate: Vec<u32>,
}

impl Default for NotificationDefaults {
    fn default() -> Self {
        Self {
            title: "MoneyPlan01".to_string(),
            body: "You have a new notification".to_string(),
            icon: "/static/icon-192.png".to_string(),
            badge: "/static/icon-192.png".to_string(),
            tag: "moneyplan01-notification".to_string(),
            vibrate: vec![200, 100, 200],
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            cache_prefix: "moneyplan01".to_string(),
            version: "1.0.0".to_string(),
            origin: DEFAULT_ORIGIN.to_string(),
            scope: "/".to_string(),
            seed_keys: vec![
                "/".to_string(),
                "/static/manifest.json".to_string(),
                "/static/icon-192.png".to_string(),
                "/static/icon-512.png".to_string(),
            ],
            api_prefix: "/api/".to_string(),
            fallback_key: "/".to_string(),
            sync_tag: "sync-watchlist".to_string(),
            sync_endpoint: "/api/watchlist/prices".to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            skip_waiting: true,
            notifications: NotificationDefaults::default(),
        }
    }
}

impl WorkerConfig {
    /// Load from the default location, falling back to defaults if absent.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::config_path()?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write config file {}", path.display()))?;
        Ok(())
    }

    /// Replace the origin with `SHELLCACHE_ORIGIN` when it is set.
    pub fn apply_env(mut self) -> Result<Self> {
        if let Ok(origin) = std::env::var(ORIGIN_ENV) {
            self.origin = origin;
            self.validate()?;
        }
        Ok(self)
    }

    fn validate(&self) -> Result<()> {
        self.origin_url()?;
        if self.api_prefix.is_empty() {
            anyhow::bail!("api_prefix must not be empty");
        }
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory holding persisted cache generations for this origin.
    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;

        let origin = self.origin_url()?;
        let host = origin.host_str().unwrap_or("local");
        let folder = match origin.port() {
            Some(port) => format!("{}_{}", host, port),
            None => host.to_string(),
        };
        Ok(cache_dir.join(APP_NAME).join(folder))
    }

    /// Name of the current cache generation.
    pub fn cache_name(&self) -> String {
        format!("{}-v{}", self.cache_prefix, self.version)
    }

    pub fn origin_url(&self) -> Result<Url> {
        Url::parse(&self.origin).with_context(|| format!("Invalid origin URL: {}", self.origin))
    }

    /// Absolute URL of the registered scope.
    pub fn scope_url(&self) -> Result<Url> {
        let origin = self.origin_url()?;
        origin
            .join(&self.scope)
            .with_context(|| format!("Invalid scope: {}", self.scope))
    }

    /// Resolve an origin-relative path into a GET request.
    pub fn request(&self, path: &str) -> Result<Request, FetchError> {
        let origin = Url::parse(&self.origin)
            .map_err(|e| FetchError::InvalidRequest(format!("{}: {}", self.origin, e)))?;
        Request::resolve(&origin, path)
    }

    pub fn seed_requests(&self) -> Result<Vec<Request>, FetchError> {
        self.seed_keys.iter().map(|key| self.request(key)).collect()
    }
}

//! # Client Configuration
//!
//! Configuration for a Galley client (POS terminal or kitchen display).
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     GALLEY_DEVICE_ID=kds-1                                             │
//! │     GALLEY_WS_URL=wss://orders.example.com/ws                          │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/kitchen/client.toml (Linux)                              │
//! │     ~/Library/Application Support/com.galley.kitchen/client.toml       │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     role = kitchen, auto-generated device id                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [device]
//! id = "550e8400-e29b-41d4-a716-446655440000"
//! name = "Grill Screen"
//! role = "kitchen"
//! token = "q0b3...base64..."   # encrypted at rest, see SecretStore
//!
//! [backend]
//! ws_url = "wss://orders.example.com/ws"
//! http_url = "https://orders.example.com"
//!
//! [sync]
//! interval_secs = 30
//! batch_size = 50
//!
//! [channel]
//! heartbeat_interval_secs = 10
//! heartbeat_timeout_secs = 30
//! max_retries = 0
//!
//! [kitchen]
//! cancel_countdown_secs = 30
//! ```
//!
//! The config is loaded once at startup and shared behind an `Arc`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};
use crate::secret::{SecretStore, KEY_FILE_NAME};
use crate::status::SNAPSHOT_FILE_NAME;

// =============================================================================
// Device Role
// =============================================================================

/// What kind of client this device is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceRole {
    /// Point-of-sale terminal. Produces orders and replays its outbox.
    Pos,

    /// Kitchen display. Consumes order messages and renders tickets.
    #[default]
    Kitchen,
}

impl DeviceRole {
    /// Returns true if this device renders kitchen tickets.
    pub fn shows_tickets(&self) -> bool {
        matches!(self, DeviceRole::Kitchen)
    }
}

impl std::fmt::Display for DeviceRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceRole::Pos => write!(f, "pos"),
            DeviceRole::Kitchen => write!(f, "kitchen"),
        }
    }
}

impl std::str::FromStr for DeviceRole {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pos" | "register" => Ok(DeviceRole::Pos),
            "kitchen" | "kds" => Ok(DeviceRole::Kitchen),
            other => Err(SyncError::InvalidConfig(format!(
                "Unknown device role: '{}'. Valid options: pos, kitchen",
                other
            ))),
        }
    }
}

// =============================================================================
// Device Configuration
// =============================================================================

/// Configuration for this device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Unique device identifier. Auto-generated on first run if not provided.
    pub id: String,

    /// Human-readable device name (e.g., "Register 1", "Grill Screen").
    #[serde(default = "default_device_name")]
    pub name: String,

    #[serde(default)]
    pub role: DeviceRole,

    /// Device token issued by the backend, encrypted with the installation
    /// key. Empty means "not provisioned".
    #[serde(default)]
    pub token: String,
}

fn default_device_name() -> String {
    "Kitchen Display".to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            id: Uuid::new_v4().to_string(),
            name: default_device_name(),
            role: DeviceRole::default(),
            token: String::new(),
        }
    }
}

// =============================================================================
// Backend Endpoints
// =============================================================================

/// Where the authoritative backend lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendSettings {
    /// WebSocket endpoint for the messaging channel.
    #[serde(default = "default_ws_url")]
    pub ws_url: String,

    /// Base URL for the HTTP sync endpoints.
    #[serde(default = "default_http_url")]
    pub http_url: String,

    /// `host:port` the connectivity probe dials. Derived from `http_url`
    /// when unset.
    #[serde(default)]
    pub probe_addr: Option<String>,
}

fn default_ws_url() -> String {
    "ws://localhost:8080/ws".to_string()
}

fn default_http_url() -> String {
    "http://localhost:8080".to_string()
}

impl Default for BackendSettings {
    fn default() -> Self {
        BackendSettings {
            ws_url: default_ws_url(),
            http_url: default_http_url(),
            probe_addr: None,
        }
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Outbox replay settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Interval between periodic sync runs while online (seconds).
    #[serde(default = "default_sync_interval")]
    pub interval_secs: u64,

    /// Number of outbox entries pushed per request.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Upper bound on the reachability handshake (seconds).
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,

    /// Interval between connectivity probes (seconds).
    #[serde(default = "default_probe_interval")]
    pub probe_interval_secs: u64,
}

fn default_sync_interval() -> u64 {
    30
}
fn default_batch_size() -> u32 {
    50
}
fn default_handshake_timeout() -> u64 {
    5
}
fn default_probe_interval() -> u64 {
    10
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            interval_secs: default_sync_interval(),
            batch_size: default_batch_size(),
            handshake_timeout_secs: default_handshake_timeout(),
            probe_interval_secs: default_probe_interval(),
        }
    }
}

// =============================================================================
// Channel Settings
// =============================================================================

/// Messaging channel timeouts and reconnect policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSettings {
    /// Connection timeout (seconds).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// How long to wait for `auth_response` after connecting (seconds).
    #[serde(default = "default_auth_timeout")]
    pub auth_timeout_secs: u64,

    /// Interval between outgoing heartbeats (seconds).
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// Reconnect if no inbound heartbeat arrives within this window (seconds).
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_secs: u64,

    /// Initial backoff duration (milliseconds) for reconnection.
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff duration (seconds) for reconnection.
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,

    /// Consecutive failed connection attempts before giving up.
    /// Set to 0 for infinite retries.
    #[serde(default)]
    pub max_retries: u32,
}

fn default_connect_timeout() -> u64 {
    10
}
fn default_auth_timeout() -> u64 {
    10
}
fn default_heartbeat_interval() -> u64 {
    10
}
fn default_heartbeat_timeout() -> u64 {
    30
}
fn default_initial_backoff() -> u64 {
    500
}
fn default_max_backoff() -> u64 {
    60
}

impl Default for ChannelSettings {
    fn default() -> Self {
        ChannelSettings {
            connect_timeout_secs: default_connect_timeout(),
            auth_timeout_secs: default_auth_timeout(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            heartbeat_timeout_secs: default_heartbeat_timeout(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
            max_retries: 0,
        }
    }
}

// =============================================================================
// Kitchen & Storage Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KitchenSettings {
    /// How long a cancelled ticket stays on screen before removal (seconds).
    #[serde(default = "default_cancel_countdown")]
    pub cancel_countdown_secs: u64,
}

fn default_cancel_countdown() -> u64 {
    galley_core::DEFAULT_CANCEL_COUNTDOWN_SECS
}

impl Default for KitchenSettings {
    fn default() -> Self {
        KitchenSettings {
            cancel_countdown_secs: default_cancel_countdown(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Overrides the per-user data directory (key file, snapshot, database).
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

// =============================================================================
// Main Client Configuration
// =============================================================================

/// Complete client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub device: DeviceConfig,

    #[serde(default)]
    pub backend: BackendSettings,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub channel: ChannelSettings,

    #[serde(default)]
    pub kitchen: KitchenSettings,

    #[serde(default)]
    pub storage: StorageSettings,
}

impl ClientConfig {
    /// Creates a new config with defaults and a generated device ID.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (client.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading client config from file");
                let contents = std::fs::read_to_string(&path).map_err(|e| {
                    SyncError::ConfigLoadFailed(format!("{}: {}", path.display(), e))
                })?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load client config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::ConfigSaveFailed(format!("{}: {}", parent.display(), e)))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)
            .map_err(|e| SyncError::ConfigSaveFailed(format!("{}: {}", path.display(), e)))?;

        info!(?path, "Client config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.device.id.trim().is_empty() {
            return Err(SyncError::MissingDeviceId);
        }

        let ws = url::Url::parse(&self.backend.ws_url)?;
        if !matches!(ws.scheme(), "ws" | "wss") {
            return Err(SyncError::InvalidUrl(format!(
                "WebSocket URL must start with ws:// or wss://, got: {}",
                self.backend.ws_url
            )));
        }

        let http = url::Url::parse(&self.backend.http_url)?;
        if !matches!(http.scheme(), "http" | "https") {
            return Err(SyncError::InvalidUrl(format!(
                "HTTP URL must start with http:// or https://, got: {}",
                self.backend.http_url
            )));
        }

        if self.sync.batch_size == 0 {
            return Err(SyncError::InvalidConfig(
                "batch_size must be greater than 0".into(),
            ));
        }

        // Zero periods panic tokio intervals; zero timeouts fail every attempt.
        for (name, value) in [
            ("sync.interval_secs", self.sync.interval_secs),
            ("sync.handshake_timeout_secs", self.sync.handshake_timeout_secs),
            ("sync.probe_interval_secs", self.sync.probe_interval_secs),
            ("channel.connect_timeout_secs", self.channel.connect_timeout_secs),
            ("channel.auth_timeout_secs", self.channel.auth_timeout_secs),
            ("channel.heartbeat_interval_secs", self.channel.heartbeat_interval_secs),
            ("channel.initial_backoff_ms", self.channel.initial_backoff_ms),
            ("channel.max_backoff_secs", self.channel.max_backoff_secs),
        ] {
            if value == 0 {
                return Err(SyncError::InvalidConfig(format!("{} must be greater than 0", name)));
            }
        }

        if self.channel.heartbeat_timeout_secs <= self.channel.heartbeat_interval_secs {
            return Err(SyncError::InvalidConfig(format!(
                "heartbeat_timeout_secs ({}) must exceed heartbeat_interval_secs ({})",
                self.channel.heartbeat_timeout_secs, self.channel.heartbeat_interval_secs
            )));
        }

        if self.channel.initial_backoff() > self.channel.max_backoff() {
            return Err(SyncError::InvalidConfig(
                "initial_backoff_ms must not exceed max_backoff_secs".into(),
            ));
        }

        Ok(())
    }

    /// Applies `GALLEY_*` environment variable overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides from `lookup`, keyed by environment variable name.
    pub(crate) fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(id) = lookup("GALLEY_DEVICE_ID") {
            debug!(device_id = %id, "Overriding device ID from environment");
            self.device.id = id;
        }

        if let Some(name) = lookup("GALLEY_DEVICE_NAME") {
            self.device.name = name;
        }

        if let Some(role) = lookup("GALLEY_DEVICE_ROLE") {
            match role.parse() {
                Ok(parsed) => self.device.role = parsed,
                Err(_) => warn!(role = %role, "Unknown device role in environment"),
            }
        }

        // Plaintext here; upgrade_secrets encrypts it before it is saved.
        if let Some(token) = lookup("GALLEY_DEVICE_TOKEN") {
            self.device.token = token;
        }

        if let Some(url) = lookup("GALLEY_WS_URL") {
            debug!(url = %url, "Overriding WebSocket URL from environment");
            self.backend.ws_url = url;
        }

        if let Some(url) = lookup("GALLEY_HTTP_URL") {
            debug!(url = %url, "Overriding HTTP URL from environment");
            self.backend.http_url = url;
        }

        if let Some(addr) = lookup("GALLEY_PROBE_ADDR") {
            self.backend.probe_addr = Some(addr);
        }

        if let Some(secs) = lookup("GALLEY_SYNC_INTERVAL_SECS") {
            if let Ok(s) = secs.parse::<u64>() {
                self.sync.interval_secs = s;
            }
        }

        if let Some(secs) = lookup("GALLEY_CANCEL_COUNTDOWN_SECS") {
            if let Ok(s) = secs.parse::<u64>() {
                self.kitchen.cancel_countdown_secs = s;
            }
        }

        if let Some(dir) = lookup("GALLEY_DATA_DIR") {
            self.storage.data_dir = Some(PathBuf::from(dir));
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "galley", "kitchen")
            .map(|dirs| dirs.config_dir().join("client.toml"))
    }

    // =========================================================================
    // Device Token
    // =========================================================================

    /// Encrypts a device token that is still stored as legacy plaintext.
    ///
    /// Returns true if the stored value changed and the config should be
    /// saved.
    pub fn upgrade_secrets(&mut self, secrets: &SecretStore) -> SyncResult<bool> {
        let upgraded = secrets.encrypt_if_needed(&self.device.token)?;
        if upgraded == self.device.token {
            return Ok(false);
        }

        info!(device_id = %self.device.id, "Encrypted plaintext device token");
        self.device.token = upgraded;
        Ok(true)
    }

    /// Returns the decrypted device token. Empty if not provisioned.
    pub fn device_token(&self, secrets: &SecretStore) -> SyncResult<String> {
        secrets.decrypt(&self.device.token)
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn device_id(&self) -> &str {
        &self.device.id
    }

    pub fn role(&self) -> DeviceRole {
        self.device.role
    }

    /// Returns the data directory: the configured override, else the
    /// per-user data directory.
    pub fn data_dir(&self) -> SyncResult<PathBuf> {
        if let Some(dir) = &self.storage.data_dir {
            return Ok(dir.clone());
        }
        directories::ProjectDirs::from("com", "galley", "kitchen")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .ok_or_else(|| SyncError::InvalidConfig("No home directory for data files".into()))
    }

    pub fn key_path(&self) -> SyncResult<PathBuf> {
        Ok(self.data_dir()?.join(KEY_FILE_NAME))
    }

    pub fn snapshot_path(&self) -> SyncResult<PathBuf> {
        Ok(self.data_dir()?.join(SNAPSHOT_FILE_NAME))
    }

    /// Returns the `host:port` the connectivity probe should dial.
    pub fn probe_addr(&self) -> SyncResult<String> {
        if let Some(addr) = &self.backend.probe_addr {
            return Ok(addr.clone());
        }
        let url = url::Url::parse(&self.backend.http_url)?;
        let host = url
            .host_str()
            .ok_or_else(|| SyncError::InvalidUrl(format!("No host in {}", self.backend.http_url)))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| SyncError::InvalidUrl(format!("No port for {}", self.backend.http_url)))?;
        Ok(format!("{}:{}", host, port))
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync.interval_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.sync.handshake_timeout_secs)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.sync.probe_interval_secs)
    }

    pub fn cancel_countdown(&self) -> Duration {
        Duration::from_secs(self.kitchen.cancel_countdown_secs)
    }
}

impl ChannelSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }
}

//! # Sync Configuration
//!
//! Configuration management for the sync engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     VELA_API_URL=https://api.example.com                               │
//! │     VELA_DEVICE_ID=abc-123                                             │
//! │     VELA_MERGE_STRATEGY=smart                                          │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/vela-pos/sync.toml (Linux)                               │
//! │     ~/Library/Application Support/com.vela.pos/sync.toml (macOS)       │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     Smart merge, hourly export, auto-generated device_id               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # sync.toml
//! [device]
//! id = "550e8400-e29b-41d4-a716-446655440000"
//! name = "Register 1"
//!
//! [api]
//! base_url = "https://api.example.com/v1"
//! request_timeout_secs = 15
//!
//! [network]
//! poll_interval_secs = 30
//!
//! [export]
//! interval_secs = 3600
//! batch_size = 10
//! max_attempts = 3
//! retry_delay_ms = 2000
//!
//! [merge]
//! strategy = "smart"
//! local_fields = ["name", "description", "price", "billAmount"]
//!
//! [merge.overrides]
//! clients = ["name", "description"]
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use vela_core::{EntityKind, MergePolicy, MergeStrategy};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Device Configuration
// =============================================================================

/// Configuration for this device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Unique device identifier (UUID v4).
    /// Auto-generated on first run if not provided.
    pub id: String,

    /// Human-readable device name (e.g., "Register 1", "Back Office").
    #[serde(default = "default_device_name")]
    pub name: String,
}

fn default_device_name() -> String {
    "POS Terminal".to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            id: Uuid::new_v4().to_string(),
            name: default_device_name(),
        }
    }
}

// =============================================================================
// API Configuration
// =============================================================================

/// Configuration for the remote REST backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the backend (e.g. `https://api.example.com/v1`).
    /// Entity paths are appended to this, so a trailing slash matters.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// URL probed to decide online/offline. Defaults to the base URL.
    #[serde(default)]
    pub probe_url: Option<String>,

    /// Per-request timeout (seconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://localhost:3000/".to_string()
}

fn default_request_timeout() -> u64 {
    15
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            base_url: default_base_url(),
            probe_url: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl ApiConfig {
    /// Parsed base URL.
    pub fn base_url(&self) -> SyncResult<Url> {
        Ok(Url::parse(&self.base_url)?)
    }

    /// URL the connectivity probe should hit.
    pub fn probe_url(&self) -> SyncResult<Url> {
        match &self.probe_url {
            Some(url) => Ok(Url::parse(url)?),
            None => self.base_url(),
        }
    }

    /// Per-request timeout as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

// =============================================================================
// Network Monitor Settings
// =============================================================================

/// Settings for the connectivity monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Interval between background connectivity probes (seconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

fn default_poll_interval() -> u64 {
    30
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            poll_interval_secs: default_poll_interval(),
        }
    }
}

impl NetworkConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

// =============================================================================
// Export Job Settings
// =============================================================================

/// Settings for the periodic queue-drain job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Interval between scheduled drain passes (seconds).
    #[serde(default = "default_export_interval")]
    pub interval_secs: u64,

    /// Maximum queue entries processed per drain pass.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Delivery attempts per entry within one drain pass.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Fixed delay between attempts (milliseconds).
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
}

fn default_export_interval() -> u64 {
    3600
}

fn default_batch_size() -> u32 {
    10
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    2000
}

impl Default for ExportConfig {
    fn default() -> Self {
        ExportConfig {
            interval_secs: default_export_interval(),
            batch_size: default_batch_size(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay(),
        }
    }
}

impl ExportConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

// =============================================================================
// Merge Settings
// =============================================================================

/// Settings for conflict merging.
///
/// `local_fields` is the allow-list of business fields where a diverging
/// local value wins under the smart strategy; `overrides` narrows or widens
/// it per collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Default merge strategy.
    #[serde(default)]
    pub strategy: MergeStrategy,

    /// Fields where local edits win under the smart strategy.
    #[serde(default = "default_local_fields")]
    pub local_fields: Vec<String>,

    /// Per-collection overrides of `local_fields`, keyed by collection
    /// name (e.g. `clients`, `billings`).
    #[serde(default)]
    pub overrides: BTreeMap<String, Vec<String>>,
}

fn default_local_fields() -> Vec<String> {
    vec![
        "name".to_string(),
        "description".to_string(),
        "price".to_string(),
        "billAmount".to_string(),
    ]
}

impl Default for MergeConfig {
    fn default() -> Self {
        MergeConfig {
            strategy: MergeStrategy::default(),
            local_fields: default_local_fields(),
            overrides: BTreeMap::new(),
        }
    }
}

impl MergeConfig {
    /// Builds the [`MergePolicy`] used by the merge logic.
    ///
    /// Unknown collection names in `overrides` fail loudly rather than
    /// silently configuring nothing.
    pub fn policy(&self) -> SyncResult<MergePolicy> {
        let mut policy = MergePolicy::new(self.local_fields.iter().map(String::as_str));

        for (kind_name, fields) in &self.overrides {
            let kind = kind_name
                .parse::<EntityKind>()
                .map_err(|e| SyncError::InvalidConfig(e.to_string()))?;
            policy = policy.with_kind(kind, fields.iter().map(String::as_str));
        }

        Ok(policy)
    }
}

// =============================================================================
// Main Sync Configuration
// =============================================================================

/// Complete sync configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Device-specific configuration.
    #[serde(default)]
    pub device: DeviceConfig,

    /// Remote backend configuration.
    #[serde(default)]
    pub api: ApiConfig,

    /// Connectivity monitor settings.
    #[serde(default)]
    pub network: NetworkConfig,

    /// Export job settings.
    #[serde(default)]
    pub export: ExportConfig,

    /// Merge strategy settings.
    #[serde(default)]
    pub merge: MergeConfig,
}

impl SyncConfig {
    /// Creates a new config with defaults and a generated device ID.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (sync.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        // Try to load from config file
        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading sync config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        // Override with environment variables
        config.apply_env_overrides();

        // Validate the configuration
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load sync config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Sync config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.device.id.is_empty() {
            return Err(SyncError::InvalidConfig(
                "device.id must not be empty".into(),
            ));
        }

        // URLs must parse; malformed ones would otherwise only surface
        // deep inside the first request.
        self.api.base_url()?;
        self.api.probe_url()?;

        if self.export.batch_size == 0 {
            return Err(SyncError::InvalidConfig(
                "export.batch_size must be greater than 0".into(),
            ));
        }

        if self.export.max_attempts == 0 {
            return Err(SyncError::InvalidConfig(
                "export.max_attempts must be greater than 0".into(),
            ));
        }

        // Fail fast on unknown collection names in merge overrides
        self.merge.policy()?;

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("VELA_API_URL") {
            debug!(url = %url, "Overriding API URL from environment");
            self.api.base_url = url;
        }

        if let Ok(id) = std::env::var("VELA_DEVICE_ID") {
            debug!(device_id = %id, "Overriding device ID from environment");
            self.device.id = id;
        }

        if let Ok(name) = std::env::var("VELA_DEVICE_NAME") {
            self.device.name = name;
        }

        if let Ok(strategy) = std::env::var("VELA_MERGE_STRATEGY") {
            match strategy.parse() {
                Ok(parsed) => {
                    debug!(strategy = %strategy, "Overriding merge strategy from environment");
                    self.merge.strategy = parsed;
                }
                Err(_) => warn!(strategy = %strategy, "Unknown merge strategy in environment"),
            }
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "vela", "pos").map(|dirs| {
            let config_dir = dirs.config_dir();
            config_dir.join("sync.toml")
        })
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Returns the device ID.
    pub fn device_id(&self) -> &str {
        &self.device.id
    }

    /// Returns the default merge strategy.
    pub fn strategy(&self) -> MergeStrategy {
        self.merge.strategy
    }
}

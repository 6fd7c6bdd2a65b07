//! # Hub Configuration
//!
//! Configuration management for the hub.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     AMPERE_PLATFORM_ID=my-hub                                          │
//! │     AMPERE_BASE_URL=https://hub.example.com                            │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/ampere-hub/hub.toml (Linux)                              │
//! │     ~/Library/Application Support/com.ampere.hub/hub.toml (macOS)      │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     role HUB, one party NL*AMP, protocol versions 2.2.1 and 2.1.1      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # hub.toml
//! [platform]
//! id = "ampere-hub"
//! role = "HUB"
//! base_url = "https://hub.example.com"
//! versions = ["2.2.1", "2.1.1"]
//!
//! [[platform.parties]]
//! country_code = "NL"
//! party_id = "AMP"
//! role = "HUB"
//! name = "Ampere Hub"
//!
//! [server]
//! port = 8080
//!
//! [commands]
//! timeout_secs = 600
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use ampere_core::validation::{validate_country_code, validate_party_id, validate_url};
use ampere_core::{BusinessDetails, CredentialsRole, ModuleId, Role, SUPPORTED_VERSIONS};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Platform Settings
// =============================================================================

/// A party hosted by the local platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartySettings {
    pub country_code: String,
    pub party_id: String,
    pub role: Role,
    /// Business name published in the credentials exchange.
    #[serde(default = "default_party_name")]
    pub name: String,
    #[serde(default)]
    pub website: Option<String>,
}

fn default_party_name() -> String {
    "Ampere Hub".to_string()
}

impl PartySettings {
    pub fn credentials_role(&self) -> CredentialsRole {
        CredentialsRole {
            role: self.role,
            business_details: BusinessDetails {
                name: self.name.clone(),
                website: self.website.clone(),
                extra: Default::default(),
            },
            party_id: self.party_id.clone(),
            country_code: self.country_code.clone(),
        }
    }
}

/// Identity of the local platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformSettings {
    /// Platform id used as the owner of locally authored data.
    #[serde(default = "default_platform_id")]
    pub id: String,

    /// Functional role published to peers.
    #[serde(default = "default_role")]
    pub role: Role,

    /// Public base URL; every endpoint is derived from it.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Supported protocol versions, in preference order.
    #[serde(default = "default_versions")]
    pub versions: Vec<String>,

    #[serde(default = "default_parties")]
    pub parties: Vec<PartySettings>,
}

fn default_platform_id() -> String {
    "ampere-hub".to_string()
}

fn default_role() -> Role {
    Role::Hub
}

fn default_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_versions() -> Vec<String> {
    SUPPORTED_VERSIONS.iter().map(|v| v.to_string()).collect()
}

fn default_parties() -> Vec<PartySettings> {
    vec![PartySettings {
        country_code: "NL".to_string(),
        party_id: "AMP".to_string(),
        role: Role::Hub,
        name: default_party_name(),
        website: None,
    }]
}

impl Default for PlatformSettings {
    fn default() -> Self {
        PlatformSettings {
            id: default_platform_id(),
            role: default_role(),
            base_url: default_base_url(),
            versions: default_versions(),
            parties: default_parties(),
        }
    }
}

// =============================================================================
// Server Settings
// =============================================================================

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Bind address (default: 0.0.0.0 for all interfaces).
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Token the local backend presents on the `/hub` API.
    /// The local API is disabled when unset.
    #[serde(default)]
    pub admin_token: Option<String>,
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerSettings {
    fn default() -> Self {
        ServerSettings {
            bind_addr: default_bind_addr(),
            port: default_port(),
            admin_token: None,
        }
    }
}

impl ServerSettings {
    /// Returns the full bind address.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

// =============================================================================
// Client Settings
// =============================================================================

/// Outbound HTTP client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSettings {
    /// Timeout of protocol calls to peers (seconds).
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Timeout of webhook calls (seconds).
    #[serde(default = "default_webhook_timeout")]
    pub webhook_timeout_secs: u64,

    /// Total attempts for idempotent GET requests.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial backoff between GET attempts (milliseconds).
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff between GET attempts (seconds).
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,
}

fn default_timeout() -> u64 {
    60
}
fn default_webhook_timeout() -> u64 {
    10
}
fn default_max_attempts() -> u32 {
    3
}
fn default_initial_backoff() -> u64 {
    500
}
fn default_max_backoff() -> u64 {
    10
}

impl Default for ClientSettings {
    fn default() -> Self {
        ClientSettings {
            timeout_secs: default_timeout(),
            webhook_timeout_secs: default_webhook_timeout(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
        }
    }
}

impl ClientSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook_timeout_secs)
    }
}

// =============================================================================
// Pull Settings
// =============================================================================

/// Worker pool sizes per module, sized by expected volume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSettings {
    #[serde(default = "default_location_workers")]
    pub locations: usize,
    #[serde(default = "default_small_workers")]
    pub tariffs: usize,
    #[serde(default = "default_large_workers")]
    pub tokens: usize,
    #[serde(default = "default_large_workers")]
    pub sessions: usize,
    #[serde(default = "default_large_workers")]
    pub cdrs: usize,
    #[serde(default = "default_small_workers")]
    pub client_info: usize,
}

fn default_location_workers() -> usize {
    8
}
fn default_small_workers() -> usize {
    4
}
fn default_large_workers() -> usize {
    16
}

impl Default for WorkerSettings {
    fn default() -> Self {
        WorkerSettings {
            locations: default_location_workers(),
            tariffs: default_small_workers(),
            tokens: default_large_workers(),
            sessions: default_large_workers(),
            cdrs: default_large_workers(),
            client_info: default_small_workers(),
        }
    }
}

impl WorkerSettings {
    /// Worker pool size for a pullable module.
    pub fn for_module(&self, module: ModuleId) -> usize {
        match module {
            ModuleId::Locations => self.locations,
            ModuleId::Tariffs => self.tariffs,
            ModuleId::Tokens => self.tokens,
            ModuleId::Sessions => self.sessions,
            ModuleId::Cdrs => self.cdrs,
            ModuleId::HubClientInfo => self.client_info,
            ModuleId::Commands | ModuleId::Credentials => 1,
        }
    }

    fn all(&self) -> [usize; 6] {
        [
            self.locations,
            self.tariffs,
            self.tokens,
            self.sessions,
            self.cdrs,
            self.client_info,
        ]
    }
}

/// Remote pull settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullSettings {
    /// Objects requested per page.
    #[serde(default = "default_page_size")]
    pub page_size: u64,

    /// Batches buffered between a page reader and its consumer.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,

    /// Hard ceiling on pages read from one platform in one pull.
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    #[serde(default)]
    pub workers: WorkerSettings,
}

fn default_page_size() -> u64 {
    100
}
fn default_queue_depth() -> usize {
    10
}
fn default_max_pages() -> u32 {
    100
}

impl Default for PullSettings {
    fn default() -> Self {
        PullSettings {
            page_size: default_page_size(),
            queue_depth: default_queue_depth(),
            max_pages: default_max_pages(),
            workers: WorkerSettings::default(),
        }
    }
}

// =============================================================================
// Command Settings
// =============================================================================

/// Command state machine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandSettings {
    /// Business deadline of a command (seconds).
    #[serde(default = "default_command_timeout")]
    pub timeout_secs: u64,

    /// Interval of the two deadline sweeps (seconds).
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_command_timeout() -> u64 {
    ampere_core::DEFAULT_COMMAND_TIMEOUT_SECS
}
fn default_sweep_interval() -> u64 {
    60
}

impl Default for CommandSettings {
    fn default() -> Self {
        CommandSettings {
            timeout_secs: default_command_timeout(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl CommandSettings {
    pub fn timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.timeout_secs as i64)
    }
}

// =============================================================================
// Schedule Settings
// =============================================================================

/// Periodic fallback pull from platforms that do not push.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleSettings {
    /// Interval of the fallback pull sweep (seconds), 0 disables it.
    #[serde(default = "default_fallback_interval")]
    pub fallback_pull_interval_secs: u64,

    /// Only pull objects updated within this window (seconds) of the sweep.
    #[serde(default = "default_fallback_window")]
    pub fallback_window_secs: u64,
}

fn default_fallback_interval() -> u64 {
    3600
}
fn default_fallback_window() -> u64 {
    7200
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        ScheduleSettings {
            fallback_pull_interval_secs: default_fallback_interval(),
            fallback_window_secs: default_fallback_window(),
        }
    }
}

// =============================================================================
// Webhook Settings
// =============================================================================

/// Webhook receivers notified on changes and command events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookSettings {
    #[serde(default)]
    pub urls: Vec<String>,
}

// =============================================================================
// Database Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Database file. Defaults to `hub.db` in the platform data directory.
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    8
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: None,
            max_connections: default_max_connections(),
        }
    }
}

// =============================================================================
// Main Hub Configuration
// =============================================================================

/// Complete hub configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HubConfig {
    #[serde(default)]
    pub platform: PlatformSettings,

    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub client: ClientSettings,

    #[serde(default)]
    pub pull: PullSettings,

    #[serde(default)]
    pub commands: CommandSettings,

    #[serde(default)]
    pub schedule: ScheduleSettings,

    #[serde(default)]
    pub webhooks: WebhookSettings,

    #[serde(default)]
    pub database: DatabaseSettings,
}

impl HubConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (hub.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading hub config from file");
                let contents = std::fs::read_to_string(&path)?;
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
            warn!("Failed to load hub config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Hub config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.platform.id.trim().is_empty() {
            return Err(SyncError::InvalidConfig("platform.id must not be empty".into()));
        }

        validate_url("platform.base_url", &self.platform.base_url)?;

        if self.platform.versions.is_empty() {
            return Err(SyncError::InvalidConfig(
                "platform.versions must list at least one version".into(),
            ));
        }

        if self.platform.parties.is_empty() {
            return Err(SyncError::InvalidConfig(
                "platform.parties must list at least one party".into(),
            ));
        }
        for party in &self.platform.parties {
            validate_country_code(&party.country_code)?;
            validate_party_id(&party.party_id)?;
        }

        if self.pull.page_size == 0 || self.pull.queue_depth == 0 || self.pull.max_pages == 0 {
            return Err(SyncError::InvalidConfig(
                "pull.page_size, pull.queue_depth and pull.max_pages must be greater than 0".into(),
            ));
        }
        if self.pull.workers.all().iter().any(|w| *w == 0) {
            return Err(SyncError::InvalidConfig(
                "pull.workers sizes must be greater than 0".into(),
            ));
        }

        if self.commands.timeout_secs == 0 || self.commands.sweep_interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "commands.timeout_secs and commands.sweep_interval_secs must be greater than 0".into(),
            ));
        }

        for url in &self.webhooks.urls {
            validate_url("webhooks.urls", url)?;
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(id) = std::env::var("AMPERE_PLATFORM_ID") {
            debug!(platform_id = %id, "Overriding platform id from environment");
            self.platform.id = id;
        }

        if let Ok(url) = std::env::var("AMPERE_BASE_URL") {
            debug!(url = %url, "Overriding base URL from environment");
            self.platform.base_url = url;
        }

        if let Ok(addr) = std::env::var("AMPERE_BIND_ADDR") {
            self.server.bind_addr = addr;
        }

        if let Ok(port) = std::env::var("AMPERE_PORT") {
            match port.parse::<u16>() {
                Ok(p) => {
                    debug!(port = p, "Overriding port from environment");
                    self.server.port = p;
                }
                Err(_) => warn!(port = %port, "Ignoring invalid AMPERE_PORT"),
            }
        }

        if let Ok(token) = std::env::var("AMPERE_ADMIN_TOKEN") {
            self.server.admin_token = Some(token);
        }

        if let Ok(path) = std::env::var("AMPERE_DATABASE_PATH") {
            self.database.path = Some(PathBuf::from(path));
        }

        if let Ok(urls) = std::env::var("AMPERE_WEBHOOK_URLS") {
            self.webhooks.urls = urls
                .split(',')
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Ok(secs) = std::env::var("AMPERE_COMMAND_TIMEOUT_SECS") {
            if let Ok(s) = secs.parse::<u64>() {
                self.commands.timeout_secs = s;
            }
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "ampere", "hub")
            .map(|dirs| dirs.config_dir().join("hub.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn platform_id(&self) -> &str {
        &self.platform.id
    }

    /// Database file path, falling back to the platform data directory.
    pub fn database_path(&self) -> PathBuf {
        self.database.path.clone().unwrap_or_else(|| {
            directories::ProjectDirs::from("com", "ampere", "hub")
                .map(|dirs| dirs.data_dir().join("hub.db"))
                .unwrap_or_else(|| PathBuf::from("hub.db"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = HubConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pull.page_size, 100);
        assert_eq!(config.pull.max_pages, 100);
        assert_eq!(config.commands.timeout_secs, 600);
        assert_eq!(config.client.timeout(), Duration::from_secs(60));
        assert_eq!(config.client.webhook_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_worker_sizes_per_module() {
        let workers = WorkerSettings::default();
        assert_eq!(workers.for_module(ModuleId::Locations), 8);
        assert_eq!(workers.for_module(ModuleId::Tariffs), 4);
        assert_eq!(workers.for_module(ModuleId::Cdrs), 16);
        assert_eq!(workers.for_module(ModuleId::HubClientInfo), 4);
    }

    #[test]
    fn test_config_validation() {
        let mut config = HubConfig::default();

        config.platform.id = String::new();
        assert!(config.validate().is_err());

        config.platform.id = "hub".into();
        config.platform.base_url = "ftp://hub".into();
        assert!(config.validate().is_err());

        config.platform.base_url = "https://hub.example.com".into();
        config.platform.parties.clear();
        assert!(config.validate().is_err());

        config.platform.parties = default_parties();
        config.pull.workers.tokens = 0;
        assert!(config.validate().is_err());

        config.pull.workers.tokens = 16;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_round_trip() {
        let toml_str = r#"
            [platform]
            id = "hub-test"
            base_url = "https://hub.test"

            [[platform.parties]]
            country_code = "DE"
            party_id = "HUB"
            role = "HUB"

            [pull]
            page_size = 50

            [pull.workers]
            locations = 2
        "#;
        let config: HubConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.platform.id, "hub-test");
        assert_eq!(config.platform.parties[0].name, "Ampere Hub");
        assert_eq!(config.pull.page_size, 50);
        assert_eq!(config.pull.workers.locations, 2);
        assert_eq!(config.pull.workers.tokens, 16);
        assert!(config.validate().is_ok());

        let rendered = toml::to_string_pretty(&config).unwrap();
        assert!(rendered.contains("[platform]"));
    }
}

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::paths::Paths;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverConfig {
    #[serde(default = "default_driver_host")]
    pub host: String,
    #[serde(default = "default_driver_port")]
    pub port: u16,
    /// Explicit chromedriver binary. Falls back to `chromedriver` on PATH.
    #[serde(default)]
    pub driver_path: Option<PathBuf>,
    /// Explicit browser binary. Falls back to the known Chrome for Testing locations.
    #[serde(default)]
    pub browser_path: Option<PathBuf>,
    /// Browser user-data directory. Defaults to `~/.keepsync/chrome`.
    #[serde(default)]
    pub user_data_dir: Option<PathBuf>,
    #[serde(default = "default_startup_attempts")]
    pub startup_attempts: u32,
    #[serde(default = "default_startup_interval_ms")]
    pub startup_interval_ms: u64,
    /// Process names force-killed during cleanup.
    #[serde(default = "default_stray_processes")]
    pub stray_processes: Vec<String>,
}

fn default_driver_host() -> String {
    "localhost".to_string()
}

fn default_driver_port() -> u16 {
    9515
}

fn default_startup_attempts() -> u32 {
    50
}

fn default_startup_interval_ms() -> u64 {
    100
}

fn default_stray_processes() -> Vec<String> {
    vec![
        "chromedriver".to_string(),
        "Google Chrome for Testing".to_string(),
    ]
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            host: default_driver_host(),
            port: default_driver_port(),
            driver_path: None,
            browser_path: None,
            user_data_dir: None,
            startup_attempts: default_startup_attempts(),
            startup_interval_ms: default_startup_interval_ms(),
            stray_processes: default_stray_processes(),
        }
    }
}

impl DriverConfig {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn resolve_user_data_dir(&self, paths: &Paths) -> PathBuf {
        self.user_data_dir
            .clone()
            .unwrap_or_else(|| paths.browser_data_dir())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleConfig {
    #[serde(default = "default_auth_url")]
    pub auth_url: String,
    #[serde(default = "default_notes_url")]
    pub notes_url: String,
    #[serde(default = "default_android_id")]
    pub android_id: String,
    #[serde(default = "default_client_sig")]
    pub client_sig: String,
    #[serde(default = "default_sdk_version")]
    pub sdk_version: u32,
    #[serde(default = "default_play_services_version")]
    pub play_services_version: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_notes_user_agent")]
    pub notes_user_agent: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_auth_url() -> String {
    "https://android.clients.google.com/auth".to_string()
}

fn default_notes_url() -> String {
    "https://www.googleapis.com/notes/v1/changes".to_string()
}

fn default_android_id() -> String {
    "0123456789abcdef".to_string()
}

fn default_client_sig() -> String {
    "38918a453d07199354f8b19af05ec6562ced5788".to_string()
}

fn default_sdk_version() -> u32 {
    17
}

fn default_play_services_version() -> u64 {
    240_913_000
}

fn default_user_agent() -> String {
    "GoogleAuth/1.4".to_string()
}

fn default_notes_user_agent() -> String {
    "keepsync".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            auth_url: default_auth_url(),
            notes_url: default_notes_url(),
            android_id: default_android_id(),
            client_sig: default_client_sig(),
            sdk_version: default_sdk_version(),
            play_services_version: default_play_services_version(),
            user_agent: default_user_agent(),
            notes_user_agent: default_notes_user_agent(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Pages opened by the linking flows and the batch scraper.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinksConfig {
    #[serde(default = "default_setup_url")]
    pub setup_url: String,
    #[serde(default = "default_help_url")]
    pub help_url: String,
    #[serde(default = "default_notes_app_url")]
    pub notes_app_url: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_setup_url() -> String {
    "https://accounts.google.com/EmbeddedSetup".to_string()
}

fn default_help_url() -> String {
    "https://support.google.com/chrome/answer/2364824".to_string()
}

fn default_notes_app_url() -> String {
    "https://keep.google.com".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl Default for LinksConfig {
    fn default() -> Self {
        Self {
            setup_url: default_setup_url(),
            help_url: default_help_url(),
            notes_app_url: default_notes_app_url(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    #[serde(default = "default_sync_interval_secs")]
    pub interval_secs: u64,
}

fn default_sync_interval_secs() -> u64 {
    900
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_sync_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfig {
    /// Proxy for outbound Google requests. `None` follows HTTPS_PROXY / HTTP_PROXY.
    #[serde(default)]
    pub proxy: Option<String>,
    #[serde(default)]
    pub no_proxy: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub driver: DriverConfig,
    #[serde(default)]
    pub google: GoogleConfig,
    #[serde(default)]
    pub links: LinksConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub network: NetworkConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        let config_path = paths.config_file();
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_fills_defaults() {
        let raw = r#"{
  "driver": { "port": 9600, "strayProcesses": [] },
  "links": { "pollIntervalMs": 250 }
}"#;
        let cfg: Config = serde_json::from_str(raw).unwrap();
        assert_eq!(cfg.driver.port, 9600);
        assert_eq!(cfg.driver.host, "localhost");
        assert!(cfg.driver.stray_processes.is_empty());
        assert_eq!(cfg.driver.startup_attempts, 50);
        assert_eq!(cfg.links.poll_interval_ms, 250);
        assert_eq!(cfg.links.setup_url, "https://accounts.google.com/EmbeddedSetup");
        assert_eq!(cfg.google.user_agent, "GoogleAuth/1.4");
        assert_eq!(cfg.sync.interval_secs, 900);
    }

    #[test]
    fn test_base_url_and_user_data_dir() {
        let cfg = DriverConfig::default();
        assert_eq!(cfg.base_url(), "http://localhost:9515");
        let paths = Paths::with_base(PathBuf::from("/tmp/ks"));
        assert_eq!(cfg.resolve_user_data_dir(&paths), PathBuf::from("/tmp/ks/chrome"));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = std::env::temp_dir().join(format!("keepsync-config-{}", std::process::id()));
        let path = dir.join("config.json");
        let mut cfg = Config::default();
        cfg.network.proxy = Some("http://proxy:8080".to_string());
        cfg.save(&path).unwrap();
        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.network.proxy.as_deref(), Some("http://proxy:8080"));
        let _ = std::fs::remove_dir_all(&dir);
    }
}

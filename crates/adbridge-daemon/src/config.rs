//! Configuration loading

use adbridge_core::{BridgeOptions, DEFAULT_HIGH_WATER_MARK};
use adbridge_loopback::LoopbackProfile;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default, rename = "loopback_device")]
    pub loopback_devices: Vec<LoopbackProfile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Bind address for the HTTP/WebSocket server
    #[serde(default = "default_bind")]
    pub bind: String,
    /// TLS configuration (optional - enables HTTPS when present)
    #[serde(default)]
    pub tls: Option<TlsConfig>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            tls: None,
        }
    }
}

/// TLS/HTTPS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM format)
    pub cert: String,
    /// Path to private key file (PEM format)
    pub key: String,
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Unsent bytes allowed towards a remote client before device reads pause
    #[serde(default = "default_high_water_mark")]
    pub high_water_mark: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            high_water_mark: default_high_water_mark(),
        }
    }
}

fn default_high_water_mark() -> usize {
    DEFAULT_HIGH_WATER_MARK
}

impl BridgeConfig {
    pub fn options(&self) -> BridgeOptions {
        BridgeOptions {
            high_water_mark: self.high_water_mark,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialsConfig {
    /// Private key offered to devices; defaults to `~/.android/adbkey`
    #[serde(default)]
    pub key_path: Option<PathBuf>,
}

impl CredentialsConfig {
    pub fn resolved_key_path(&self) -> Option<PathBuf> {
        self.key_path
            .clone()
            .or_else(|| dirs::home_dir().map(|home| home.join(".android").join("adbkey")))
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}

/// Save default configuration to file
pub fn save_default_config(path: &Path) -> Result<()> {
    let config = Config {
        loopback_devices: vec![LoopbackProfile::new("LOOPBACK0001")],
        ..Default::default()
    };

    let content = toml::to_string_pretty(&config)?;
    std::fs::write(path, content)?;
    Ok(())
}

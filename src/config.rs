//! Configuration loading and persistence.
//!
//! Settings live in `config.json` under the client's config directory.
//! Every field has a default, and environment variables override the file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use std::{fs, path::Path, path::PathBuf};

/// Configuration for the STOMP client.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Value sent in the CONNECT frame's `host` header.
    pub host: String,
    /// Seconds allowed for the TCP connect and the CONNECTED reply.
    pub connect_timeout_secs: u64,
    /// Seconds `disconnect` waits for the broker's DISCONNECT receipt.
    pub disconnect_timeout_secs: u64,
    /// Directory relative summary paths resolve against.
    pub summary_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "stomp.cs.bgu.ac.il".to_string(),
            connect_timeout_secs: 5,
            disconnect_timeout_secs: 3,
            summary_dir: PathBuf::from("."),
        }
    }
}

impl Config {
    /// Returns the configuration directory path.
    ///
    /// Directory selection priority:
    /// 1. `STOMP_CLIENT_CONFIG_DIR` env var: explicit override
    /// 2. Default: platform config dir joined with `stomp-client`
    pub fn config_dir() -> Result<PathBuf> {
        if let Ok(dir) = std::env::var("STOMP_CLIENT_CONFIG_DIR") {
            return Ok(PathBuf::from(dir));
        }
        Ok(dirs::config_dir()
            .context("Could not determine config directory")?
            .join("stomp-client"))
    }

    /// Path of the default config file.
    pub fn default_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Loads configuration from the default file, with environment
    /// variable overrides. A missing file means defaults.
    pub fn load() -> Result<Self> {
        let path = Self::default_path()?;
        let mut config = if path.exists() {
            Self::read_file(&path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from an explicit file, with environment variable
    /// overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = Self::read_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("read config file: {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("parse {}", path.display()))
    }

    /// Persists the configuration as pretty JSON.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("write config file: {}", path.display()))
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(host) = var("STOMP_CLIENT_HOST") {
            self.host = host;
        }

        if let Some(summary_dir) = var("STOMP_CLIENT_SUMMARY_DIR") {
            self.summary_dir = PathBuf::from(summary_dir);
        }

        for (name, slot) in [
            ("STOMP_CLIENT_CONNECT_TIMEOUT", &mut self.connect_timeout_secs),
            ("STOMP_CLIENT_DISCONNECT_TIMEOUT", &mut self.disconnect_timeout_secs),
        ] {
            if let Some(raw) = var(name) {
                match raw.parse::<u64>() {
                    Ok(secs) => *slot = secs,
                    Err(_) => log::warn!("Ignoring {name}={raw:?}: not a number of seconds"),
                }
            }
        }
    }

    /// Connect timeout as a `Duration`.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Disconnect timeout as a `Duration`.
    pub fn disconnect_timeout(&self) -> Duration {
        Duration::from_secs(self.disconnect_timeout_secs)
    }

    /// Resolve a summary output path against `summary_dir`.
    pub fn summary_path(&self, file: &Path) -> PathBuf {
        if file.is_absolute() {
            file.to_path_buf()
        } else {
            self.summary_dir.join(file)
        }
    }
}

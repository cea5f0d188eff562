use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use catalog::CatalogConfig;
use serde::{Deserialize, Serialize};

pub const CONFIG_VERSION: u32 = 1;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub version: u32,
    pub server_url: String,
    pub user: String,
    /// Bearer token sent with every request; empty disables the header.
    pub token: String,
    /// Cache file; derived from the server account when empty.
    pub cache_path: String,
    pub request_timeout_secs: u64,
    /// Give up and abort a load that has not finished after this long.
    pub load_timeout_secs: u64,
    pub art_concurrency: usize,
    pub catalog: CatalogConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            server_url: "http://127.0.0.1:3000".to_string(),
            user: "".to_string(),
            token: "".to_string(),
            cache_path: "".to_string(),
            request_timeout_secs: 10,
            load_timeout_secs: 300,
            art_concurrency: 4,
            catalog: CatalogConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Cache file for this account, resolved against the config directory.
    pub fn cache_path(&self, config_path: &Path) -> PathBuf {
        let value = self.cache_path.trim();
        if value.is_empty() {
            let name = format!("cache-{}.redb", common::account_id(&self.server_url, &self.user));
            resolve_path(config_path, &name)
        } else {
            resolve_path(config_path, value)
        }
    }

    fn normalize(&mut self) {
        let defaults = ClientConfig::default();
        if self.version < CONFIG_VERSION {
            self.version = CONFIG_VERSION;
        }
        self.server_url = self.server_url.trim().trim_end_matches('/').to_string();
        if self.server_url.is_empty() {
            self.server_url = defaults.server_url;
        }
        self.user = self.user.trim().to_string();
        if self.request_timeout_secs == 0 {
            self.request_timeout_secs = defaults.request_timeout_secs;
        }
        if self.load_timeout_secs == 0 {
            self.load_timeout_secs = defaults.load_timeout_secs;
        }
        if self.art_concurrency == 0 {
            self.art_concurrency = defaults.art_concurrency;
        }
        if self.catalog.granularity == 0 {
            self.catalog.granularity = defaults.catalog.granularity;
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "io error: {}", err),
            ConfigError::Yaml(err) => write!(f, "yaml error: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::Yaml(err)
    }
}

pub fn config_path_from_env() -> PathBuf {
    match env::var("CATALOG_CLIENT_CONFIG") {
        Ok(value) if !value.trim().is_empty() => PathBuf::from(value),
        _ => default_config_path(),
    }
}

fn default_config_path() -> PathBuf {
    match env::current_exe() {
        Ok(exe) => exe
            .parent()
            .map(|dir| dir.join("client.yaml"))
            .unwrap_or_else(|| PathBuf::from("client.yaml")),
        Err(_) => PathBuf::from("client.yaml"),
    }
}

/// Reads the config, or writes the defaults when the file is missing. The
/// flag is true when the file was created.
pub fn load_or_create_config(path: &Path) -> Result<(ClientConfig, bool), ConfigError> {
    if path.exists() {
        let contents = fs::read_to_string(path)?;
        let mut config: ClientConfig = serde_yaml::from_str(&contents)?;
        config.normalize();
        return Ok((config, false));
    }

    let config = ClientConfig::default();
    save_config(path, &config)?;
    Ok((config, true))
}

pub fn save_config(path: &Path, config: &ClientConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let contents = serde_yaml::to_string(config)?;
    fs::write(path, contents)?;
    Ok(())
}

pub fn resolve_path(config_path: &Path, value: &str) -> PathBuf {
    let raw = PathBuf::from(value);
    if raw.is_absolute() {
        return raw;
    }
    let base = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    base.join(raw)
}

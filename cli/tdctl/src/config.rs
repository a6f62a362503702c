//! Configuration and credential storage.
//!
//! Handles:
//! - API server endpoint and TLS settings
//! - Bearer token storage
//! - Default namespace

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracedeck_agent::cluster::IN_CLUSTER_URL;
use tracedeck_agent::ClusterConfig;

/// Configuration file name.
const CONFIG_FILE: &str = "config.json";

/// Credentials file name.
const CREDENTIALS_FILE: &str = "credentials.json";

/// Get the config directory path.
fn config_dir() -> Result<PathBuf> {
    ProjectDirs::from("io", "tracedeck", "td")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))
}

/// CLI configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// API server URL.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Skip TLS certificate verification.
    #[serde(default)]
    pub insecure_tls: bool,

    /// Namespace used when `--namespace` is not given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_api_url() -> String {
    std::env::var("TRACEDECK_API_URL").unwrap_or_else(|_| IN_CLUSTER_URL.to_string())
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            insecure_tls: false,
            namespace: None,
            request_timeout_secs: default_timeout_secs(),
        }
    }
}

impl Config {
    /// Load config from disk, or return default.
    pub fn load() -> Result<Self> {
        Self::load_from(&config_dir()?.join(CONFIG_FILE))
    }

    fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {:?}", path))?;

        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config from {:?}", path))
    }

    /// Save config to disk.
    pub fn save(&self) -> Result<()> {
        let contents = serde_json::to_string_pretty(self)?;
        write_private(CONFIG_FILE, &contents)
    }

    /// Connection settings for the API server.
    pub fn cluster_config(&self, credentials: Option<&Credentials>) -> ClusterConfig {
        ClusterConfig {
            api_url: self.api_url.clone(),
            token: credentials.map(|c| c.token.clone()),
            insecure_tls: self.insecure_tls,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }
}

/// Stored credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    /// Bearer token for the API server.
    pub token: String,
}

impl Credentials {
    pub fn new(token: String) -> Self {
        Self { token }
    }

    /// Load credentials from disk.
    pub fn load() -> Result<Option<Self>> {
        let path = config_dir()?.join(CREDENTIALS_FILE);

        if !path.exists() {
            return Ok(None);
        }

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read credentials from {:?}", path))?;

        let creds: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse credentials from {:?}", path))?;

        Ok(Some(creds))
    }

    /// Save credentials to disk.
    pub fn save(&self) -> Result<()> {
        let contents = serde_json::to_string_pretty(self)?;
        write_private(CREDENTIALS_FILE, &contents)
    }

    /// Delete credentials from disk.
    pub fn delete() -> Result<()> {
        let path = config_dir()?.join(CREDENTIALS_FILE);

        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to delete credentials at {:?}", path))?;
        }

        Ok(())
    }

    /// Token with all but the last four characters hidden.
    pub fn masked(&self) -> String {
        let len = self.token.chars().count();
        if len <= 4 {
            return "****".to_string();
        }
        let visible: String = self.token.chars().skip(len - 4).collect();
        format!("****{visible}")
    }
}

/// Write `contents` to `file` in the config directory, readable only by the
/// owner on Unix.
fn write_private(file: &str, contents: &str) -> Result<()> {
    let dir = config_dir()?;
    fs::create_dir_all(&dir)?;
    let path = dir.join(file);

    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&path)
            .with_context(|| format!("Failed to open {:?}", path))?;
        file.write_all(contents.as_bytes())?;
    }

    #[cfg(not(unix))]
    {
        fs::write(&path, contents).with_context(|| format!("Failed to write {:?}", path))?;
    }

    Ok(())
}

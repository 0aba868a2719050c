use anyhow::{Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
    #[serde(default = "default_saved_dir")]
    pub saved_dir: PathBuf,
    #[serde(default)]
    pub on_conflict: ConflictPolicy,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: default_upload_dir(),
            saved_dir: default_saved_dir(),
            on_conflict: ConflictPolicy::default(),
        }
    }
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("uploads")
}
fn default_saved_dir() -> PathBuf {
    PathBuf::from("saved_data")
}

/// What to do when an upload's file name is already taken.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Replace both the raw upload and the saved artifact.
    #[default]
    Overwrite,
    /// Refuse the upload.
    Reject,
    /// Store under the first free `<stem>-<n>.<ext>` name.
    Version,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:5000".to_string()
}
fn default_max_upload_bytes() -> usize {
    50 * 1024 * 1024
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    let storage = &config.storage;
    if storage.upload_dir.as_os_str().is_empty() {
        anyhow::bail!("storage.upload_dir must not be empty");
    }
    if storage.saved_dir.as_os_str().is_empty() {
        anyhow::bail!("storage.saved_dir must not be empty");
    }
    if storage.upload_dir == storage.saved_dir {
        anyhow::bail!(
            "storage.upload_dir and storage.saved_dir must differ (both are '{}')",
            storage.upload_dir.display()
        );
    }

    if config.server.max_upload_bytes == 0 {
        anyhow::bail!("server.max_upload_bytes must be > 0");
    }
    config
        .server
        .bind
        .parse::<SocketAddr>()
        .with_context(|| format!("server.bind is not a socket address: '{}'", config.server.bind))?;

    Ok(())
}

//! Server configuration.
//!
//! Reads TOML from `~/.config/resumefetch/server.toml`. The file is written
//! with default values the first time the server starts.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use resumefetch_fast_open::{DEFAULT_BACKLOG, DEFAULT_FAST_OPEN_QUEUE, HandlerPolicy, ListenerConfig};
use serde::{Deserialize, Serialize};

fn default_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_backlog() -> u32 {
    DEFAULT_BACKLOG
}

fn default_fast_open_queue() -> u32 {
    DEFAULT_FAST_OPEN_QUEUE
}

fn default_resource() -> PathBuf {
    PathBuf::from("resource.bin")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
    #[serde(default = "default_backlog")]
    pub backlog: u32,
    #[serde(default = "default_fast_open_queue")]
    pub fast_open_queue: u32,
    /// File served to every connection. Relative paths resolve against the
    /// working directory.
    #[serde(default = "default_resource")]
    pub resource: PathBuf,
    #[serde(default)]
    pub policy: HandlerPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            backlog: default_backlog(),
            fast_open_queue: default_fast_open_queue(),
            resource: default_resource(),
            policy: HandlerPolicy::default(),
        }
    }
}

impl ServerConfig {
    /// Loads the config at `path`, writing the defaults there first when it
    /// does not exist.
    pub fn load_or_create(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save(path)?;
            tracing::info!(path = %path.display(), "wrote default server config");
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        if config.backlog == 0 {
            anyhow::bail!("{}: backlog must be positive", path.display());
        }
        tracing::debug!(path = %path.display(), "server config loaded");
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("failed to write config {}", path.display()))?;
        Ok(())
    }

    pub fn listener_config(&self) -> ListenerConfig {
        ListenerConfig {
            addr: self.bind,
            backlog: self.backlog,
            fast_open_queue: self.fast_open_queue,
        }
    }
}

pub fn config_file_path() -> PathBuf {
    config_base_dir().join("resumefetch").join("server.toml")
}

fn config_base_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata)
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home).join(".config")
    }
}

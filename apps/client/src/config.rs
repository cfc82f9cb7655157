//! Client configuration.
//!
//! Reads TOML from `~/.config/resumefetch/client.toml` (or `--config`).
//! Every field is optional; command-line flags take precedence.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use resumefetch_transfer::Timeouts;
use serde::{Deserialize, Serialize};

fn default_connect_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Abort a transfer phase when no body bytes arrive for this long.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_idle_timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_origin: Option<String>,
    #[serde(default)]
    pub insecure: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keylog: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            read_idle_timeout_secs: None,
            fallback_origin: None,
            insecure: false,
            keylog: None,
        }
    }
}

impl ClientConfig {
    /// Loads `explicit`, or the default file when it exists.
    ///
    /// A missing explicit file or an unparsable file is an error.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        match explicit {
            Some(path) => Self::load_from(path),
            None => {
                let path = config_file_path();
                if path.exists() {
                    Self::load_from(&path)
                } else {
                    tracing::debug!(path = %path.display(), "no client config, using defaults");
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        if config.connect_timeout_secs == 0 {
            anyhow::bail!("{}: connect_timeout_secs must be positive", path.display());
        }
        tracing::debug!(path = %path.display(), "client config loaded");
        Ok(config)
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            connect: Duration::from_secs(self.connect_timeout_secs),
            read_idle: self
                .read_idle_timeout_secs
                .filter(|&secs| secs > 0)
                .map(Duration::from_secs),
        }
    }
}

pub fn config_file_path() -> PathBuf {
    config_base_dir().join("resumefetch").join("client.toml")
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config: ClientConfig = toml::from_str("").unwrap();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.timeouts(), Timeouts::default());
    }

    #[test]
    fn fields_override_defaults() {
        let config: ClientConfig = toml::from_str(
            r#"
            connect_timeout_secs = 5
            read_idle_timeout_secs = 10
            fallback_origin = "127.0.0.1:8080"
            insecure = true
            "#,
        )
        .unwrap();

        let timeouts = config.timeouts();
        assert_eq!(timeouts.connect, Duration::from_secs(5));
        assert_eq!(timeouts.read_idle, Some(Duration::from_secs(10)));
        assert_eq!(config.fallback_origin.as_deref(), Some("127.0.0.1:8080"));
        assert!(config.insecure);
    }

    #[test]
    fn zero_idle_timeout_disables_deadline() {
        let config = ClientConfig {
            read_idle_timeout_secs: Some(0),
            ..ClientConfig::default()
        };
        assert_eq!(config.timeouts().read_idle, None);
    }

    #[test]
    fn missing_explicit_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ClientConfig::load(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(err.to_string().contains("absent.toml"));
    }

    #[test]
    fn invalid_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.toml");
        std::fs::write(&path, "connect_timeout_secs = \"soon\"").unwrap();
        assert!(ClientConfig::load_from(&path).is_err());

        std::fs::write(&path, "connect_timeout_secs = 0").unwrap();
        assert!(ClientConfig::load_from(&path).is_err());
    }

    #[test]
    fn default_path_is_under_resumefetch() {
        let path = config_file_path();
        assert!(path.ends_with("resumefetch/client.toml"));
    }
}

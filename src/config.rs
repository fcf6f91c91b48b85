use crate::account::AccountType;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const APP_DIR_NAME: &str = "copilot-gateway";
const CONFIG_FILE_NAME: &str = "config.toml";

/// Process-wide switches chosen at startup.
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    pub account_type: AccountType,
    pub manual_approve: bool,
    pub rate_limit_seconds: Option<u64>,
    pub rate_limit_wait: bool,
    pub show_token: bool,
}

/// The single record persisted between runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_fallback: Option<ModelFallbackFile>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelFallbackFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claude_opus: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claude_sonnet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claude_haiku: Option<String>,
}

impl PersistedConfig {
    /// The stored GitHub token, if it is non-blank.
    pub fn github_token(&self) -> Option<&str> {
        self.github_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

/// Reads and merges fields into the on-disk config file.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store rooted at the default application directory.
    pub fn default_location() -> Self {
        Self::new(app_dir().join(CONFIG_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the record. A missing, empty, or malformed file yields an empty record.
    pub fn load(&self) -> PersistedConfig {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return PersistedConfig::default();
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "Failed to read config: {e}. Using defaults.");
                return PersistedConfig::default();
            }
        };

        if content.trim().is_empty() {
            return PersistedConfig::default();
        }

        match toml::from_str(&content) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "Failed to parse config: {e}. Using defaults.");
                PersistedConfig::default()
            }
        }
    }

    /// Set one top-level field, keeping every other field already on disk.
    pub fn write_field(&self, field: &str, value: impl Into<toml::Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut table = match std::fs::read_to_string(&self.path) {
            Ok(content) if !content.trim().is_empty() => {
                content.parse::<toml::Table>().unwrap_or_else(|e| {
                    tracing::warn!("Could not read existing config: {e}. Starting fresh.");
                    toml::Table::new()
                })
            }
            _ => toml::Table::new(),
        };
        table.insert(field.to_string(), value.into());

        std::fs::write(&self.path, toml::to_string_pretty(&table)?)?;
        restrict_permissions(&self.path)?;
        Ok(())
    }

    pub fn persist_github_token(&self, token: &str) -> Result<()> {
        self.write_field("github_token", token)
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// `$HOME/.local/share/copilot-gateway`
pub fn app_dir() -> PathBuf {
    home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".local")
        .join("share")
        .join(APP_DIR_NAME)
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

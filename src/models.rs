//! Model discovery and alias resolution.
//!
//! Claude clients ask for dated model ids (`claude-sonnet-4-20250514`) that the
//! Copilot backend does not list. Ids the backend knows pass through; the
//! rest are matched by family prefix onto a configured fallback.

use crate::config::ModelFallbackFile;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub const DEFAULT_CLAUDE_OPUS: &str = "claude-opus-4.6";
pub const DEFAULT_CLAUDE_SONNET: &str = "claude-sonnet-4.5";
pub const DEFAULT_CLAUDE_HAIKU: &str = "claude-haiku-4.5";

pub const ENV_CLAUDE_OPUS: &str = "MODEL_FALLBACK_CLAUDE_OPUS";
pub const ENV_CLAUDE_SONNET: &str = "MODEL_FALLBACK_CLAUDE_SONNET";
pub const ENV_CLAUDE_HAIKU: &str = "MODEL_FALLBACK_CLAUDE_HAIKU";

/// Upstream ids used when a Claude family alias is not known upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFallbackConfig {
    pub claude_opus: String,
    pub claude_sonnet: String,
    pub claude_haiku: String,
}

impl Default for ModelFallbackConfig {
    fn default() -> Self {
        Self {
            claude_opus: DEFAULT_CLAUDE_OPUS.to_string(),
            claude_sonnet: DEFAULT_CLAUDE_SONNET.to_string(),
            claude_haiku: DEFAULT_CLAUDE_HAIKU.to_string(),
        }
    }
}

impl ModelFallbackConfig {
    /// Environment override > persisted value > built-in default.
    pub fn from_env_and_file(file: Option<&ModelFallbackFile>) -> Self {
        Self::resolve(file, |key| std::env::var(key).ok())
    }

    pub fn resolve(
        file: Option<&ModelFallbackFile>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let pick = |key: &str, persisted: Option<&String>, default: &str| {
            env(key)
                .filter(|v| !v.is_empty())
                .or_else(|| persisted.filter(|v| !v.is_empty()).cloned())
                .unwrap_or_else(|| default.to_string())
        };

        Self {
            claude_opus: pick(
                ENV_CLAUDE_OPUS,
                file.and_then(|f| f.claude_opus.as_ref()),
                DEFAULT_CLAUDE_OPUS,
            ),
            claude_sonnet: pick(
                ENV_CLAUDE_SONNET,
                file.and_then(|f| f.claude_sonnet.as_ref()),
                DEFAULT_CLAUDE_SONNET,
            ),
            claude_haiku: pick(
                ENV_CLAUDE_HAIKU,
                file.and_then(|f| f.claude_haiku.as_ref()),
                DEFAULT_CLAUDE_HAIKU,
            ),
        }
    }
}

/// Map a requested model id onto an id the upstream will accept.
#[must_use]
pub fn resolve_model(
    requested: &str,
    known_ids: Option<&HashSet<String>>,
    fallbacks: &ModelFallbackConfig,
) -> String {
    if known_ids.is_some_and(|ids| ids.contains(requested)) {
        return requested.to_string();
    }

    if requested.starts_with("claude-opus-") {
        fallbacks.claude_opus.clone()
    } else if requested.starts_with("claude-sonnet-") {
        fallbacks.claude_sonnet.clone()
    } else if requested.starts_with("claude-haiku-") {
        fallbacks.claude_haiku.clone()
    } else {
        requested.to_string()
    }
}

/// One entry of the Copilot `/models` listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamModel {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    #[serde(default)]
    pub model_picker_enabled: bool,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsResponse {
    pub data: Vec<UpstreamModel>,
    #[serde(default = "default_list_object")]
    pub object: String,
}

fn default_list_object() -> String {
    "list".to_string()
}

impl ModelsResponse {
    pub fn ids(&self) -> HashSet<String> {
        self.data.iter().map(|m| m.id.clone()).collect()
    }
}

//! Upstream collaborators: GitHub (identity, device flow, Copilot tokens) and
//! the Copilot chat backend.
//!
//! The rest of the crate talks to these through [`GitHubApi`] and
//! [`CopilotApi`] so handlers and the token manager can be exercised against
//! in-process fakes.

pub mod copilot;
pub mod github;
pub mod vscode;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::ModelsResponse;

pub use copilot::CopilotClient;
pub use github::GitHubClient;

/// `editor-version` used until [`vscode::fetch_vscode_version`] has answered.
pub const EDITOR_VERSION: &str = "vscode/1.96.2";
pub const EDITOR_PLUGIN_VERSION: &str = "copilot-chat/0.26.7";
pub const USER_AGENT: &str = "GitHubCopilotChat/0.26.7";
pub const API_VERSION: &str = "2025-04-01";

/// One decoded upstream server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
}

pub type SseFrameStream = Pin<Box<dyn Stream<Item = Result<SseFrame>> + Send>>;

/// What a chat completion call produced: a whole JSON body, or a live frame stream.
pub enum ChatCompletionsOutcome {
    Complete(serde_json::Value),
    Stream(SseFrameStream),
}

impl std::fmt::Debug for ChatCompletionsOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Complete(v) => f.debug_tuple("Complete").field(v).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceCode {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub expires_in: u64,
    pub interval: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopilotToken {
    pub token: String,
    #[serde(default)]
    pub expires_at: i64,
    pub refresh_in: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubUser {
    pub login: String,
}

#[async_trait]
pub trait GitHubApi: Send + Sync {
    async fn get_device_code(&self) -> Result<DeviceCode>;

    /// Poll until the operator has authorized the device, returning the GitHub token.
    async fn poll_access_token(&self, device: &DeviceCode) -> Result<String>;

    async fn get_user(&self, github_token: &str) -> Result<GitHubUser>;

    async fn get_copilot_token(&self, github_token: &str) -> Result<CopilotToken>;

    /// Raw quota snapshot from `copilot_internal/user`.
    async fn get_copilot_usage(&self, github_token: &str) -> Result<serde_json::Value>;
}

#[async_trait]
pub trait CopilotApi: Send + Sync {
    /// `payload` must carry a `stream` flag; a truthy one yields a frame stream.
    async fn create_chat_completions(&self, payload: serde_json::Value) -> Result<ChatCompletionsOutcome>;

    async fn create_embeddings(&self, payload: serde_json::Value) -> Result<serde_json::Value>;

    async fn get_models(&self) -> Result<ModelsResponse>;
}

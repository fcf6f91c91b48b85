use std::sync::Arc;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde_json::Value;

use super::{
    ChatCompletionsOutcome, CopilotApi, SseFrame, API_VERSION, EDITOR_PLUGIN_VERSION,
    EDITOR_VERSION, USER_AGENT,
};
use crate::auth::AuthState;
use crate::error::{GatewayError, Result};
use crate::models::ModelsResponse;

/// `reqwest` implementation of [`CopilotApi`].
///
/// The bearer token is read from the shared [`AuthState`] on every call, so a
/// background refresh is picked up by the next request.
#[derive(Clone)]
pub struct CopilotClient {
    http: reqwest::Client,
    base_url: String,
    auth: Arc<AuthState>,
    editor_version: String,
}

impl CopilotClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, auth: Arc<AuthState>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            auth,
            editor_version: EDITOR_VERSION.to_string(),
        }
    }

    /// Send `editor_version` (e.g. `vscode/1.105.1`) instead of the built-in one.
    #[must_use]
    pub fn with_editor_version(mut self, editor_version: impl Into<String>) -> Self {
        self.editor_version = editor_version.into();
        self
    }

    async fn headers(&self, vision: bool) -> Result<HeaderMap> {
        let token = self
            .auth
            .copilot_token()
            .await
            .ok_or(GatewayError::NotAuthenticated)?;

        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| GatewayError::config(format!("Invalid token header: {e}")))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("copilot-integration-id", HeaderValue::from_static("vscode-chat"));
        headers.insert(
            "editor-version",
            HeaderValue::from_str(&self.editor_version)
                .map_err(|e| GatewayError::config(format!("Invalid editor version: {e}")))?,
        );
        headers.insert(
            "editor-plugin-version",
            HeaderValue::from_static(EDITOR_PLUGIN_VERSION),
        );
        headers.insert(
            reqwest::header::USER_AGENT,
            HeaderValue::from_static(USER_AGENT),
        );
        headers.insert("openai-intent", HeaderValue::from_static("conversation-panel"));
        headers.insert("x-github-api-version", HeaderValue::from_static(API_VERSION));
        let request_id = uuid::Uuid::new_v4().to_string();
        headers.insert(
            "x-request-id",
            HeaderValue::from_str(&request_id)
                .map_err(|e| GatewayError::config(format!("Invalid request id: {e}")))?,
        );
        headers.insert(
            "x-vscode-user-agent-library-version",
            HeaderValue::from_static("electron-fetch"),
        );
        if vision {
            headers.insert("copilot-vision-request", HeaderValue::from_static("true"));
        }
        Ok(headers)
    }

    async fn check(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        tracing::error!(status = status.as_u16(), body = %body, "Failed to {what}");
        Err(GatewayError::from_status(status.as_u16(), body))
    }
}

/// Whether any message carries an `image_url` content part.
pub fn has_image_parts(payload: &Value) -> bool {
    messages(payload).any(|m| {
        m.get("content")
            .and_then(Value::as_array)
            .is_some_and(|parts| {
                parts
                    .iter()
                    .any(|p| p.get("type").and_then(Value::as_str) == Some("image_url"))
            })
    })
}

/// `agent` once the conversation contains assistant or tool turns, else `user`.
pub fn initiator(payload: &Value) -> &'static str {
    let agent = messages(payload).any(|m| {
        matches!(
            m.get("role").and_then(Value::as_str),
            Some("assistant" | "tool")
        )
    });
    if agent {
        "agent"
    } else {
        "user"
    }
}

fn messages(payload: &Value) -> impl Iterator<Item = &Value> {
    payload
        .get("messages")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

#[async_trait]
impl CopilotApi for CopilotClient {
    async fn create_chat_completions(&self, payload: Value) -> Result<ChatCompletionsOutcome> {
        let mut headers = self.headers(has_image_parts(&payload)).await?;
        headers.insert("X-Initiator", HeaderValue::from_static(initiator(&payload)));
        let streaming = payload.get("stream").and_then(Value::as_bool).unwrap_or(false);

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .headers(headers)
            .json(&payload)
            .send()
            .await?;
        let response = Self::check(response, "create chat completions").await?;

        if !streaming {
            return Ok(ChatCompletionsOutcome::Complete(response.json().await?));
        }

        let frames = response.bytes_stream().eventsource().map(|item| {
            item.map(|event| SseFrame {
                event: event.event,
                data: event.data,
            })
            .map_err(|e| GatewayError::protocol(format!("Failed to read upstream stream: {e}")))
        });
        Ok(ChatCompletionsOutcome::Stream(Box::pin(frames)))
    }

    async fn create_embeddings(&self, payload: Value) -> Result<Value> {
        let response = self
            .http
            .post(format!("{}/embeddings", self.base_url))
            .headers(self.headers(false).await?)
            .json(&payload)
            .send()
            .await?;
        let response = Self::check(response, "create embeddings").await?;
        Ok(response.json().await?)
    }

    async fn get_models(&self) -> Result<ModelsResponse> {
        let response = self
            .http
            .get(format!("{}/models", self.base_url))
            .headers(self.headers(false).await?)
            .send()
            .await?;
        let response = Self::check(response, "get models").await?;
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_vision_detection() {
        let text_only = json!({"messages": [{"role": "user", "content": "hi"}]});
        assert!(!has_image_parts(&text_only));

        let with_image = json!({"messages": [{"role": "user", "content": [
            {"type": "text", "text": "look"},
            {"type": "image_url", "image_url": {"url": "data:image/png;base64,AAA"}}
        ]}]});
        assert!(has_image_parts(&with_image));
    }

    #[test]
    fn test_initiator() {
        assert_eq!(
            initiator(&json!({"messages": [{"role": "user", "content": "hi"}]})),
            "user"
        );
        assert_eq!(
            initiator(&json!({"messages": [
                {"role": "user", "content": "hi"},
                {"role": "tool", "content": "42", "tool_call_id": "c"}
            ]})),
            "agent"
        );
        assert_eq!(initiator(&json!({})), "user");
    }

    #[tokio::test]
    async fn test_missing_token_is_not_authenticated() {
        let client = CopilotClient::new(
            reqwest::Client::new(),
            "http://127.0.0.1:9",
            Arc::new(AuthState::default()),
        );
        let err = client.get_models().await.unwrap_err();
        assert!(matches!(err, GatewayError::NotAuthenticated));
    }

    #[tokio::test]
    async fn test_headers_carry_editor_version() {
        let auth = Arc::new(AuthState::default());
        auth.set_copilot_token("tid=abc").await;
        let client = CopilotClient::new(reqwest::Client::new(), "http://127.0.0.1:9", auth);

        let headers = client.headers(false).await.unwrap();
        assert_eq!(headers["editor-version"], EDITOR_VERSION);
        assert_eq!(headers[AUTHORIZATION], "Bearer tid=abc");
        assert!(headers.get("copilot-vision-request").is_none());

        let headers = client
            .with_editor_version("vscode/1.105.1")
            .headers(true)
            .await
            .unwrap();
        assert_eq!(headers["editor-version"], "vscode/1.105.1");
        assert_eq!(headers["copilot-vision-request"], "true");
    }
}

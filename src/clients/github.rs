use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use tokio::time::Instant;

use super::{
    CopilotToken, DeviceCode, GitHubApi, GitHubUser, API_VERSION, EDITOR_PLUGIN_VERSION,
    EDITOR_VERSION, USER_AGENT,
};
use crate::error::{GatewayError, Result};

pub const GITHUB_CLIENT_ID: &str = "Iv1.b507a08c87ecfe98";
pub const GITHUB_OAUTH_SCOPE: &str = "read:user";
pub const DEVICE_CODE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";

const GITHUB_BASE_URL: &str = "https://github.com";
const GITHUB_API_BASE_URL: &str = "https://api.github.com";

/// Added to the server-provided interval between polls.
const POLL_INTERVAL_BUFFER_SECS: u64 = 1;
/// Added to the interval each time GitHub answers `slow_down`.
const SLOW_DOWN_STEP_SECS: u64 = 5;

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// `reqwest` implementation of [`GitHubApi`].
#[derive(Debug, Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    base_url: String,
    api_base_url: String,
    editor_version: String,
}

impl GitHubClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            base_url: GITHUB_BASE_URL.to_string(),
            api_base_url: GITHUB_API_BASE_URL.to_string(),
            editor_version: EDITOR_VERSION.to_string(),
        }
    }

    /// Send `editor_version` (e.g. `vscode/1.105.1`) instead of the built-in one.
    #[must_use]
    pub fn with_editor_version(mut self, editor_version: impl Into<String>) -> Self {
        self.editor_version = editor_version.into();
        self
    }

    /// Point the client at other hosts (used against local test servers).
    #[must_use]
    pub fn with_base_urls(
        mut self,
        base_url: impl Into<String>,
        api_base_url: impl Into<String>,
    ) -> Self {
        self.base_url = base_url.into();
        self.api_base_url = api_base_url.into();
        self
    }

    fn api_headers(&self, github_token: &str) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("token {github_token}"))
                .map_err(|e| GatewayError::config(format!("Invalid token header: {e}")))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            reqwest::header::USER_AGENT,
            HeaderValue::from_static(USER_AGENT),
        );
        headers.insert(
            "editor-version",
            HeaderValue::from_str(&self.editor_version)
                .map_err(|e| GatewayError::config(format!("Invalid editor version: {e}")))?,
        );
        headers.insert(
            "editor-plugin-version",
            HeaderValue::from_static(EDITOR_PLUGIN_VERSION),
        );
        headers.insert("x-github-api-version", HeaderValue::from_static(API_VERSION));
        Ok(headers)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        github_token: &str,
    ) -> Result<T> {
        let url = format!("{}{path}", self.api_base_url);
        let response = self
            .http
            .get(&url)
            .headers(self.api_headers(github_token)?)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(%url, status = status.as_u16(), body = %body, "GitHub request failed");
            return Err(GatewayError::from_status(status.as_u16(), body));
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl GitHubApi for GitHubClient {
    async fn get_device_code(&self) -> Result<DeviceCode> {
        let response = self
            .http
            .post(format!("{}/login/device/code", self.base_url))
            .header(ACCEPT, "application/json")
            .form(&[("client_id", GITHUB_CLIENT_ID), ("scope", GITHUB_OAUTH_SCOPE)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::from_status(status.as_u16(), body));
        }
        Ok(response.json().await?)
    }

    async fn poll_access_token(&self, device: &DeviceCode) -> Result<String> {
        let deadline = Instant::now() + Duration::from_secs(device.expires_in);
        let mut interval = device.interval;

        loop {
            tokio::time::sleep(Duration::from_secs(interval + POLL_INTERVAL_BUFFER_SECS)).await;
            if Instant::now() >= deadline {
                return Err(GatewayError::device_flow("device code expired before authorization"));
            }

            let response = self
                .http
                .post(format!("{}/login/oauth/access_token", self.base_url))
                .header(ACCEPT, "application/json")
                .form(&[
                    ("client_id", GITHUB_CLIENT_ID),
                    ("device_code", device.device_code.as_str()),
                    ("grant_type", DEVICE_CODE_GRANT_TYPE),
                ])
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                tracing::debug!(status = status.as_u16(), body = %body, "Access token poll failed");
                return Err(GatewayError::from_status(status.as_u16(), body));
            }

            let answer: AccessTokenResponse = response.json().await?;
            if let Some(token) = answer.access_token.filter(|t| !t.is_empty()) {
                return Ok(token);
            }

            match answer.error.as_deref() {
                Some("authorization_pending") | None => {
                    tracing::debug!("Authorization pending");
                }
                Some("slow_down") => {
                    interval += SLOW_DOWN_STEP_SECS;
                    tracing::debug!(interval, "GitHub asked to slow down polling");
                }
                Some("expired_token") => {
                    return Err(GatewayError::device_flow("device code expired"));
                }
                Some("access_denied") => {
                    return Err(GatewayError::device_flow("authorization was denied"));
                }
                Some(other) => {
                    return Err(GatewayError::device_flow(format!(
                        "{other}: {}",
                        answer.error_description.unwrap_or_default()
                    )));
                }
            }
        }
    }

    async fn get_user(&self, github_token: &str) -> Result<GitHubUser> {
        self.get_json("/user", github_token).await
    }

    async fn get_copilot_token(&self, github_token: &str) -> Result<CopilotToken> {
        self.get_json("/copilot_internal/v2/token", github_token).await
    }

    async fn get_copilot_usage(&self, github_token: &str) -> Result<serde_json::Value> {
        self.get_json("/copilot_internal/user", github_token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_headers() {
        let client = GitHubClient::new(reqwest::Client::new());
        let headers = client.api_headers("gho_abc").unwrap();
        assert_eq!(headers[AUTHORIZATION], "token gho_abc");
        assert_eq!(headers["editor-version"], EDITOR_VERSION);
        assert_eq!(headers["x-github-api-version"], API_VERSION);

        let headers = client
            .with_editor_version("vscode/1.105.1")
            .api_headers("gho_abc")
            .unwrap();
        assert_eq!(headers["editor-version"], "vscode/1.105.1");
    }

    #[test]
    fn test_invalid_token_header() {
        let client = GitHubClient::new(reqwest::Client::new());
        assert!(client.api_headers("bad\ntoken").is_err());
    }

    #[test]
    fn test_access_token_response_shapes() {
        let pending: AccessTokenResponse =
            serde_json::from_str(r#"{"error":"authorization_pending","error_description":"wait"}"#)
                .unwrap();
        assert!(pending.access_token.is_none());
        assert_eq!(pending.error.as_deref(), Some("authorization_pending"));

        let done: AccessTokenResponse =
            serde_json::from_str(r#"{"access_token":"gho_x","token_type":"bearer","scope":"read:user"}"#)
                .unwrap();
        assert_eq!(done.access_token.as_deref(), Some("gho_x"));
    }

    async fn local_github() -> GitHubClient {
        use axum::http::{HeaderMap as AxumHeaders, StatusCode};
        use axum::routing::get;
        use axum::{Json, Router};

        let app = Router::new()
            .route(
                "/user",
                get(|headers: AxumHeaders| async move {
                    if headers["authorization"] == "token gho_good" {
                        Ok(Json(serde_json::json!({"login": "octocat", "id": 1})))
                    } else {
                        Err((StatusCode::UNAUTHORIZED, "Bad credentials"))
                    }
                }),
            )
            .route(
                "/copilot_internal/v2/token",
                get(|| async {
                    Json(serde_json::json!({
                        "token": "tid=abc",
                        "expires_at": 1_700_000_000u64,
                        "refresh_in": 1500
                    }))
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let base = format!("http://{addr}");
        GitHubClient::new(reqwest::Client::new()).with_base_urls(base.clone(), base)
    }

    #[tokio::test]
    async fn test_user_lookup_and_auth_failure() {
        let github = local_github().await;

        let user = github.get_user("gho_good").await.unwrap();
        assert_eq!(user.login, "octocat");

        let err = github.get_user("gho_stale").await.unwrap_err();
        assert!(err.is_auth_error());
        assert_eq!(err.public_message(), "Bad credentials");
    }

    #[tokio::test]
    async fn test_copilot_token_exchange() {
        let github = local_github().await;
        let token = github.get_copilot_token("gho_good").await.unwrap();
        assert_eq!(token.token, "tid=abc");
        assert_eq!(token.refresh_in, 1500);
    }
}

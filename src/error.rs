//! Error types for the gateway.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GatewayError {
    #[error("Invalid request payload: {message}")]
    Validation { message: String },

    #[error("Upstream rejected credentials ({status}): {body}")]
    UpstreamAuth { status: u16, body: String },

    #[error("Rate limit exceeded")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request rejected by operator")]
    ApprovalRejected,

    #[error("Upstream protocol error: {message}")]
    UpstreamProtocol { message: String },

    #[error("Upstream returned status {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("No Copilot token available")]
    NotAuthenticated,

    #[error("Device flow error: {message}")]
    DeviceFlow { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML write error: {0}")]
    TomlWrite(#[from] toml::ser::Error),
}

impl GatewayError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::UpstreamProtocol {
            message: msg.into(),
        }
    }

    pub fn device_flow(msg: impl Into<String>) -> Self {
        Self::DeviceFlow {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Classify a non-2xx upstream answer.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        match status {
            401 | 403 => Self::UpstreamAuth { status, body },
            _ => Self::Upstream { status, body },
        }
    }

    /// Whether a fresh login could cure this failure.
    pub fn is_auth_error(&self) -> bool {
        matches!(self, Self::UpstreamAuth { .. })
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::UpstreamAuth { status, .. } | Self::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::ApprovalRejected => StatusCode::FORBIDDEN,
            Self::NotAuthenticated => StatusCode::UNAUTHORIZED,
            Self::UpstreamProtocol { .. } | Self::Http(_) => StatusCode::BAD_GATEWAY,
            Self::DeviceFlow { .. }
            | Self::Config { .. }
            | Self::Io(_)
            | Self::Json(_)
            | Self::Toml(_)
            | Self::TomlWrite(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Text placed in the `{ "message": ... }` error body.
    pub fn public_message(&self) -> String {
        match self {
            Self::UpstreamAuth { body, .. } | Self::Upstream { body, .. } if !body.is_empty() => {
                body.clone()
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self, "Request failed");
        } else {
            tracing::warn!(status = status.as_u16(), error = %self, "Request refused");
        }
        let body = serde_json::json!({ "message": self.public_message() });
        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

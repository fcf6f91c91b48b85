//! GitHub login, Copilot token exchange and background refresh.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::clients::GitHubApi;
use crate::config::ConfigStore;
use crate::error::{GatewayError, Result};

/// Refresh this long before the Copilot token's reported refresh time.
pub const REFRESH_MARGIN_SECS: u64 = 60;

/// Tokens shared between the token manager (sole writer) and the upstream clients.
#[derive(Debug, Default)]
pub struct AuthState {
    github_token: RwLock<Option<String>>,
    copilot_token: RwLock<Option<String>>,
}

impl AuthState {
    pub async fn github_token(&self) -> Option<String> {
        self.github_token.read().await.clone()
    }

    pub async fn copilot_token(&self) -> Option<String> {
        self.copilot_token.read().await.clone()
    }

    pub async fn set_github_token(&self, token: impl Into<String>) {
        *self.github_token.write().await = Some(token.into());
    }

    pub async fn set_copilot_token(&self, token: impl Into<String>) {
        *self.copilot_token.write().await = Some(token.into());
    }
}

/// Owns the login flow and keeps [`AuthState`] populated.
pub struct TokenManager {
    github: Arc<dyn GitHubApi>,
    auth: Arc<AuthState>,
    store: ConfigStore,
    show_token: bool,
}

impl TokenManager {
    pub fn new(
        github: Arc<dyn GitHubApi>,
        auth: Arc<AuthState>,
        store: ConfigStore,
        show_token: bool,
    ) -> Self {
        Self {
            github,
            auth,
            store,
            show_token,
        }
    }

    /// Make sure a verified GitHub token is in [`AuthState`].
    ///
    /// With `force` unset a stored token is tried first. If GitHub rejects it,
    /// one device login follows; whatever happens after that is final.
    pub async fn setup_github_token(&self, force: bool) -> Result<()> {
        let cached = if force {
            None
        } else {
            self.store.load().github_token().map(str::to_string)
        };

        if let Some(token) = cached {
            match self.adopt_and_verify(token).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_auth_error() => {
                    warn!("Stored GitHub token invalid or expired. Re-authenticating...");
                }
                Err(e) => {
                    error!("Failed to verify GitHub token: {e}");
                    return Err(e);
                }
            }
        }

        let token = match self.device_login().await {
            Ok(token) => token,
            Err(e) => {
                error!("Failed to get GitHub token: {e}");
                return Err(e);
            }
        };
        self.adopt_and_verify(token).await
    }

    /// Use a token supplied on the command line; it is neither persisted nor retried.
    pub async fn use_github_token(&self, token: &str) -> Result<()> {
        self.adopt_and_verify(token.trim().to_string()).await
    }

    async fn adopt_and_verify(&self, token: String) -> Result<()> {
        if self.show_token {
            info!("GitHub token: {token}");
        }
        self.auth.set_github_token(token.clone()).await;
        let user = self.github.get_user(&token).await?;
        info!("Logged in as {}", user.login);
        Ok(())
    }

    async fn device_login(&self) -> Result<String> {
        info!("Not logged in, getting new access token");
        let device = self.github.get_device_code().await?;
        debug!(?device, "Device code response");
        info!(
            "Please enter the code \"{}\" in {}",
            device.user_code, device.verification_uri
        );

        let token = self.github.poll_access_token(&device).await?;
        self.store.persist_github_token(&token)?;
        info!(path = %self.store.path().display(), "GitHub token written to config");
        Ok(token)
    }

    /// Exchange the GitHub token for a Copilot token and keep it fresh in the
    /// background until the returned handle is stopped.
    pub async fn setup_copilot_token(&self) -> Result<RefreshHandle> {
        let github_token = self
            .auth
            .github_token()
            .await
            .ok_or(GatewayError::NotAuthenticated)?;

        let first = self.github.get_copilot_token(&github_token).await?;
        self.auth.set_copilot_token(first.token.clone()).await;
        debug!("GitHub Copilot Token fetched successfully!");
        if self.show_token {
            info!("Copilot token: {}", first.token);
        }

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let github = Arc::clone(&self.github);
        let auth = Arc::clone(&self.auth);
        let show_token = self.show_token;
        let mut refresh_in = first.refresh_in;

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = tokio::time::sleep(refresh_delay(refresh_in)) => {}
                    _ = shutdown_rx.changed() => break,
                }

                debug!("Refreshing Copilot token");
                match github.get_copilot_token(&github_token).await {
                    Ok(next) => {
                        refresh_in = next.refresh_in;
                        if show_token {
                            info!("Refreshed Copilot token: {}", next.token);
                        }
                        auth.set_copilot_token(next.token).await;
                        debug!("Copilot token refreshed");
                    }
                    Err(e) => error!("Failed to refresh Copilot token: {e}"),
                }
            }
            debug!("Copilot token refresh stopped");
        });

        Ok(RefreshHandle { shutdown, task })
    }
}

/// Wait before the next refresh: `refresh_in` minus the margin, never less than a second.
pub fn refresh_delay(refresh_in: u64) -> Duration {
    Duration::from_secs(refresh_in.saturating_sub(REFRESH_MARGIN_SECS).max(1))
}

/// Handle to the background refresh task.
pub struct RefreshHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RefreshHandle {
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!("Copilot token refresh task ended abnormally: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{CopilotToken, DeviceCode, GitHubUser};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeGitHub {
        user_results: Mutex<VecDeque<Result<GitHubUser>>>,
        device_code_calls: AtomicUsize,
        user_calls: AtomicUsize,
        copilot_calls: AtomicUsize,
        failing_copilot_call: Option<usize>,
    }

    impl FakeGitHub {
        fn with_user_results(results: Vec<Result<GitHubUser>>) -> Self {
            Self {
                user_results: Mutex::new(results.into()),
                ..Default::default()
            }
        }
    }

    fn octocat() -> Result<GitHubUser> {
        Ok(GitHubUser {
            login: "octocat".to_string(),
        })
    }

    #[async_trait]
    impl GitHubApi for FakeGitHub {
        async fn get_device_code(&self) -> Result<DeviceCode> {
            self.device_code_calls.fetch_add(1, Ordering::SeqCst);
            Ok(DeviceCode {
                device_code: "dev".to_string(),
                user_code: "ABCD-1234".to_string(),
                verification_uri: "https://github.com/login/device".to_string(),
                expires_in: 900,
                interval: 5,
            })
        }

        async fn poll_access_token(&self, _device: &DeviceCode) -> Result<String> {
            Ok("gho_fresh".to_string())
        }

        async fn get_user(&self, _github_token: &str) -> Result<GitHubUser> {
            self.user_calls.fetch_add(1, Ordering::SeqCst);
            self.user_results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(octocat)
        }

        async fn get_copilot_token(&self, _github_token: &str) -> Result<CopilotToken> {
            let n = self.copilot_calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.failing_copilot_call == Some(n) {
                return Err(GatewayError::from_status(500, "boom"));
            }
            Ok(CopilotToken {
                token: format!("cop-{n}"),
                expires_at: 0,
                refresh_in: 120,
            })
        }

        async fn get_copilot_usage(&self, _github_token: &str) -> Result<serde_json::Value> {
            Ok(serde_json::json!({}))
        }
    }

    fn manager(github: Arc<FakeGitHub>, dir: &tempfile::TempDir) -> (TokenManager, Arc<AuthState>) {
        let auth = Arc::new(AuthState::default());
        let store = ConfigStore::new(dir.path().join("config.toml"));
        (
            TokenManager::new(github, Arc::clone(&auth), store, false),
            auth,
        )
    }

    #[tokio::test]
    async fn test_valid_cached_token_skips_device_flow() {
        let dir = tempfile::tempdir().unwrap();
        ConfigStore::new(dir.path().join("config.toml"))
            .persist_github_token("gho_cached")
            .unwrap();
        let github = Arc::new(FakeGitHub::default());
        let (manager, auth) = manager(Arc::clone(&github), &dir);

        manager.setup_github_token(false).await.unwrap();

        assert_eq!(auth.github_token().await.as_deref(), Some("gho_cached"));
        assert_eq!(github.device_code_calls.load(Ordering::SeqCst), 0);
        assert_eq!(github.user_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expired_cached_token_relogs_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("config.toml"));
        store.persist_github_token("gho_expired").unwrap();
        let github = Arc::new(FakeGitHub::with_user_results(vec![Err(
            GatewayError::from_status(401, "Bad credentials"),
        )]));
        let (manager, auth) = manager(Arc::clone(&github), &dir);

        manager.setup_github_token(false).await.unwrap();

        assert_eq!(github.device_code_calls.load(Ordering::SeqCst), 1);
        assert_eq!(github.user_calls.load(Ordering::SeqCst), 2);
        assert_eq!(auth.github_token().await.as_deref(), Some("gho_fresh"));
        assert_eq!(store.load().github_token(), Some("gho_fresh"));
    }

    #[tokio::test]
    async fn test_persistently_invalid_token_fails_after_one_relogin() {
        let dir = tempfile::tempdir().unwrap();
        ConfigStore::new(dir.path().join("config.toml"))
            .persist_github_token("gho_expired")
            .unwrap();
        let github = Arc::new(FakeGitHub::with_user_results(vec![
            Err(GatewayError::from_status(401, "Bad credentials")),
            Err(GatewayError::from_status(401, "Bad credentials")),
            Err(GatewayError::from_status(401, "Bad credentials")),
        ]));
        let (manager, _auth) = manager(Arc::clone(&github), &dir);

        let err = manager.setup_github_token(false).await.unwrap_err();

        assert!(err.is_auth_error());
        assert_eq!(github.device_code_calls.load(Ordering::SeqCst), 1);
        assert_eq!(github.user_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_non_auth_failure_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        ConfigStore::new(dir.path().join("config.toml"))
            .persist_github_token("gho_cached")
            .unwrap();
        let github = Arc::new(FakeGitHub::with_user_results(vec![Err(
            GatewayError::from_status(502, "bad gateway"),
        )]));
        let (manager, _auth) = manager(Arc::clone(&github), &dir);

        assert!(manager.setup_github_token(false).await.is_err());
        assert_eq!(github.device_code_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_force_ignores_cached_token() {
        let dir = tempfile::tempdir().unwrap();
        ConfigStore::new(dir.path().join("config.toml"))
            .persist_github_token("gho_cached")
            .unwrap();
        let github = Arc::new(FakeGitHub::default());
        let (manager, auth) = manager(Arc::clone(&github), &dir);

        manager.setup_github_token(true).await.unwrap();

        assert_eq!(github.device_code_calls.load(Ordering::SeqCst), 1);
        assert_eq!(auth.github_token().await.as_deref(), Some("gho_fresh"));
    }

    #[tokio::test]
    async fn test_copilot_token_requires_github_token() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, _auth) = manager(Arc::new(FakeGitHub::default()), &dir);
        assert!(matches!(
            manager.setup_copilot_token().await,
            Err(GatewayError::NotAuthenticated)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_replaces_token_and_survives_failure() {
        let dir = tempfile::tempdir().unwrap();
        let github = Arc::new(FakeGitHub {
            failing_copilot_call: Some(3),
            ..Default::default()
        });
        let (manager, auth) = manager(Arc::clone(&github), &dir);
        auth.set_github_token("gho_x").await;

        let handle = manager.setup_copilot_token().await.unwrap();
        assert_eq!(auth.copilot_token().await.as_deref(), Some("cop-1"));

        // refresh_in = 120, so each refresh fires 60 s after the last one.
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(auth.copilot_token().await.as_deref(), Some("cop-2"));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(github.copilot_calls.load(Ordering::SeqCst), 3);
        assert_eq!(auth.copilot_token().await.as_deref(), Some("cop-2"));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(auth.copilot_token().await.as_deref(), Some("cop-4"));

        handle.stop().await;
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(github.copilot_calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_refresh_delay() {
        assert_eq!(refresh_delay(1500), Duration::from_secs(1440));
        assert_eq!(refresh_delay(60), Duration::from_secs(1));
        assert_eq!(refresh_delay(0), Duration::from_secs(1));
    }
}

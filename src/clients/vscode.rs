//! Current VS Code release, sent as the `editor-version` header.

use std::time::Duration;

/// Arch Linux package recipe for the VS Code binary; its `pkgver=` line tracks
/// the latest stable release.
pub const VSCODE_PKGBUILD_URL: &str =
    "https://aur.archlinux.org/cgit/aur.git/plain/PKGBUILD?h=visual-studio-code-bin";

pub const FALLBACK_VSCODE_VERSION: &str = "1.96.2";

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Look up the latest VS Code version, or the fallback when the lookup fails.
pub async fn fetch_vscode_version(http: &reqwest::Client, url: &str) -> String {
    let lookup = async {
        let body = http
            .get(url)
            .timeout(LOOKUP_TIMEOUT)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok::<_, reqwest::Error>(body)
    };

    let version = match lookup.await {
        Ok(body) => parse_pkgver(&body).map(str::to_string),
        Err(e) => {
            tracing::warn!(error = %e, "VS Code version lookup failed");
            None
        }
    };

    let version = version.unwrap_or_else(|| FALLBACK_VSCODE_VERSION.to_string());
    tracing::info!("Using VSCode version: {version}");
    version
}

/// `1.2.3` from a `pkgver=1.2.3` line.
pub fn parse_pkgver(pkgbuild: &str) -> Option<&str> {
    pkgbuild
        .lines()
        .filter_map(|line| line.trim().strip_prefix("pkgver="))
        .map(str::trim)
        .find(|v| !v.is_empty() && v.chars().all(|c| c.is_ascii_digit() || c == '.'))
}

/// Header value for a version number.
pub fn editor_version(version: &str) -> String {
    format!("vscode/{version}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pkgver() {
        let pkgbuild = "pkgname=visual-studio-code-bin\n_pkg=code\npkgver=1.105.1\npkgrel=1\n";
        assert_eq!(parse_pkgver(pkgbuild), Some("1.105.1"));
        assert_eq!(parse_pkgver("pkgver=${_ver}\n"), None);
        assert_eq!(parse_pkgver("<html>not found</html>"), None);
    }

    #[test]
    fn test_editor_version_header() {
        assert_eq!(editor_version("1.105.1"), "vscode/1.105.1");
    }

    #[tokio::test]
    async fn test_lookup_against_local_server() {
        use axum::routing::get;

        let app = axum::Router::new()
            .route("/PKGBUILD", get(|| async { "pkgname=code\npkgver=1.99.3\n" }))
            .route(
                "/missing",
                get(|| async { (axum::http::StatusCode::NOT_FOUND, "gone") }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let http = reqwest::Client::new();
        assert_eq!(
            fetch_vscode_version(&http, &format!("http://{addr}/PKGBUILD")).await,
            "1.99.3"
        );
        assert_eq!(
            fetch_vscode_version(&http, &format!("http://{addr}/missing")).await,
            FALLBACK_VSCODE_VERSION
        );
    }
}

use clap::{Args, Parser, Subcommand};
use copilot_gateway::account::AccountType;
use copilot_gateway::admission::{Admission, TerminalApproval};
use copilot_gateway::auth::{AuthState, TokenManager};
use copilot_gateway::clients::vscode::{editor_version, fetch_vscode_version, VSCODE_PKGBUILD_URL};
use copilot_gateway::clients::{CopilotApi, CopilotClient, GitHubApi, GitHubClient};
use copilot_gateway::config::app_dir;
use copilot_gateway::logging::Journal;
use copilot_gateway::models::ModelFallbackConfig;
use copilot_gateway::usage::CopilotUsage;
use copilot_gateway::{build_router, AppState, ConfigStore, RuntimeConfig, SharedJournal};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "copilot-gateway",
    about = "Anthropic Messages API gateway for GitHub Copilot",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the gateway server
    Start(StartArgs),
    /// Run the GitHub device login without starting the server
    Auth(AuthArgs),
    /// Show current Copilot usage and quota information
    CheckUsage,
    /// Print diagnostic information about this installation
    Debug(DebugArgs),
}

#[derive(Args)]
struct StartArgs {
    /// Port to listen on
    #[arg(short, long, default_value_t = 4141)]
    port: u16,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Account type: individual, business or enterprise
    #[arg(short, long, default_value = "individual")]
    account_type: String,

    /// Ask for approval on the terminal before forwarding each request
    #[arg(long)]
    manual: bool,

    /// Minimum seconds between forwarded requests
    #[arg(short, long = "rate-limit")]
    rate_limit: Option<u64>,

    /// Wait out the rate limit instead of refusing with 429
    #[arg(short, long)]
    wait: bool,

    /// GitHub token to use instead of the stored one or a device login
    #[arg(short, long)]
    github_token: Option<String>,

    /// Log GitHub and Copilot tokens when they are fetched or refreshed
    #[arg(long)]
    show_token: bool,

    /// Append a JSON line per request to this file
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[derive(Args)]
struct AuthArgs {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Log the GitHub token once obtained
    #[arg(long)]
    show_token: bool,
}

#[derive(Args)]
struct DebugArgs {
    /// Print as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let verbose = match &cli.command {
        Command::Start(args) => args.verbose,
        Command::Auth(args) => args.verbose,
        Command::CheckUsage | Command::Debug(_) => false,
    };
    init_tracing(verbose);

    match cli.command {
        Command::Start(args) => run_start(args).await,
        Command::Auth(args) => run_auth(args).await,
        Command::CheckUsage => run_check_usage().await,
        Command::Debug(args) => run_debug(&args),
    }
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "copilot_gateway=debug,tower_http=debug"
    } else {
        "copilot_gateway=info,tower_http=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn http_client() -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .build()?)
}

async fn lookup_editor_version(http: &reqwest::Client) -> String {
    editor_version(&fetch_vscode_version(http, VSCODE_PKGBUILD_URL).await)
}

async fn github_client(http: reqwest::Client) -> GitHubClient {
    let version = lookup_editor_version(&http).await;
    GitHubClient::new(http).with_editor_version(version)
}

async fn run_start(args: StartArgs) -> anyhow::Result<()> {
    let config = RuntimeConfig {
        account_type: AccountType::from_name_or_default(&args.account_type),
        manual_approve: args.manual,
        rate_limit_seconds: args.rate_limit,
        rate_limit_wait: args.wait,
        show_token: args.show_token,
    };

    let store = ConfigStore::default_location();
    let persisted = store.load();
    let fallbacks = ModelFallbackConfig::from_env_and_file(persisted.model_fallback.as_ref());

    let http = http_client()?;
    let version = lookup_editor_version(&http).await;
    let auth = Arc::new(AuthState::default());
    let github: Arc<dyn GitHubApi> =
        Arc::new(GitHubClient::new(http.clone()).with_editor_version(version.clone()));
    let tokens = TokenManager::new(
        Arc::clone(&github),
        Arc::clone(&auth),
        store.clone(),
        config.show_token,
    );

    match args.github_token {
        Some(ref token) => {
            info!("Using provided GitHub token");
            tokens.use_github_token(token).await?;
        }
        None => tokens.setup_github_token(false).await?,
    }
    let refresh = tokens.setup_copilot_token().await?;

    let copilot: Arc<dyn CopilotApi> = Arc::new(
        CopilotClient::new(http, config.account_type.base_url(), Arc::clone(&auth))
            .with_editor_version(version),
    );

    let journal = match args.log_file {
        Some(ref path) => SharedJournal::new(Journal::with_file(path)?),
        None => SharedJournal::in_memory(),
    };

    let state = Arc::new(AppState {
        admission: Admission::from_config(&config, Arc::new(TerminalApproval::default())),
        config: config.clone(),
        auth,
        copilot,
        github,
        models: RwLock::new(None),
        fallbacks: fallbacks.clone(),
        journal,
    });

    if let Err(e) = state.refresh_models().await {
        warn!("Could not fetch the model list, aliases resolve by prefix only: {e}");
    }

    info!("copilot-gateway v{}", env!("CARGO_PKG_VERSION"));
    info!("  Account:     {}", config.account_type.name());
    info!("  Upstream:    {}", config.account_type.base_url());
    info!("  Port:        {}", args.port);
    info!(
        "  Rate limit:  {}",
        config
            .rate_limit_seconds
            .map_or_else(|| "off".to_string(), |s| format!(
                "{s}s ({})",
                if config.rate_limit_wait { "wait" } else { "reject" }
            ))
    );
    info!("  Manual:      {}", config.manual_approve);
    info!(
        "  Fallbacks:   opus={} sonnet={} haiku={}",
        fallbacks.claude_opus, fallbacks.claude_sonnet, fallbacks.claude_haiku
    );
    if let Some(ref path) = args.log_file {
        info!("  Log file:    {}", path.display());
    }

    let app = build_router(state);
    let bind_addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);
    info!("");
    info!("  To use with Claude Code:");
    info!("    ANTHROPIC_BASE_URL=http://localhost:{} claude", args.port);
    info!("");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    refresh.stop().await;
    info!("Shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

async fn run_auth(args: AuthArgs) -> anyhow::Result<()> {
    let store = ConfigStore::default_location();
    let github: Arc<dyn GitHubApi> = Arc::new(github_client(http_client()?).await);
    let tokens = TokenManager::new(
        github,
        Arc::new(AuthState::default()),
        store.clone(),
        args.show_token,
    );

    tokens.setup_github_token(true).await?;
    info!("GitHub token written to {}", store.path().display());
    Ok(())
}

async fn run_check_usage() -> anyhow::Result<()> {
    let store = ConfigStore::default_location();
    let auth = Arc::new(AuthState::default());
    let github: Arc<dyn GitHubApi> = Arc::new(github_client(http_client()?).await);
    let tokens = TokenManager::new(Arc::clone(&github), Arc::clone(&auth), store, false);

    tokens.setup_github_token(false).await?;
    let token = auth
        .github_token()
        .await
        .ok_or_else(|| anyhow::anyhow!("no GitHub token after login"))?;

    let raw = github.get_copilot_usage(&token).await?;
    let usage: CopilotUsage = serde_json::from_value(raw)?;
    println!("{}", usage.report());
    Ok(())
}

#[derive(Serialize)]
struct DebugInfo {
    version: &'static str,
    runtime: RuntimeInfo,
    paths: DebugPaths,
    config_exists: bool,
    token_exists: bool,
}

#[derive(Serialize)]
struct RuntimeInfo {
    platform: &'static str,
    arch: &'static str,
}

#[derive(Serialize)]
struct DebugPaths {
    app_dir: PathBuf,
    config_path: PathBuf,
}

fn run_debug(args: &DebugArgs) -> anyhow::Result<()> {
    let store = ConfigStore::default_location();
    let config_exists = std::fs::read_to_string(store.path())
        .map(|c| !c.trim().is_empty())
        .unwrap_or(false);

    let info = DebugInfo {
        version: env!("CARGO_PKG_VERSION"),
        runtime: RuntimeInfo {
            platform: std::env::consts::OS,
            arch: std::env::consts::ARCH,
        },
        paths: DebugPaths {
            app_dir: app_dir(),
            config_path: store.path().to_path_buf(),
        },
        config_exists,
        token_exists: store.load().github_token().is_some(),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        println!("copilot-gateway debug");
        println!();
        println!("Version: {}", info.version);
        println!("Runtime: {} {}", info.runtime.platform, info.runtime.arch);
        println!();
        println!("Paths:");
        println!("- APP_DIR: {}", info.paths.app_dir.display());
        println!("- CONFIG_PATH: {}", info.paths.config_path.display());
        println!();
        println!("Config exists: {}", if info.config_exists { "Yes" } else { "No" });
        println!("Token exists: {}", if info.token_exists { "Yes" } else { "No" });
    }
    Ok(())
}

//! chartd - REST facade over a chart release manager for Kubernetes
//!
//! # Usage
//!
//! ```text
//! chartd --kubeconfig ~/.kube/config -h 127.0.0.1 -p 8080
//! ```

use chartd_kube::{ClusterCredentials, KubeContextFactory, ReleaseOrchestrator};
use chartd_repo::RepoSettings;
use chartd_server::{AppState, build_router};
use clap::{ArgAction, Parser, ValueEnum};
use miette::{IntoDiagnostic, Result, WrapErr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "chartd", version, about = "REST API for installing and managing chart releases")]
#[command(disable_help_flag = true)]
struct Cli {
    /// Path to the kubeconfig of the target cluster (in-cluster or default config when unset)
    #[arg(long, env = "KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Address the server listens on
    #[arg(short = 'h', long, default_value = "0.0.0.0")]
    host: String,

    /// Port the server listens on
    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// Path to the registry credentials file
    #[arg(long, env = "HELM_REGISTRY_CONFIG")]
    registry_config: Option<PathBuf>,

    /// Path to the file containing repository names and URLs
    #[arg(long, env = "HELM_REPOSITORY_CONFIG")]
    repository_config: Option<PathBuf>,

    /// Path to the directory containing cached repository indexes
    #[arg(long, env = "HELM_REPOSITORY_CACHE")]
    repository_cache: Option<PathBuf>,

    /// Fetch missing chart dependencies instead of rejecting the chart
    #[arg(long)]
    dependency_update: bool,

    /// Seconds allowed for rendering and applying (or deleting) a release
    #[arg(long, default_value_t = 300)]
    timeout: u64,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Print help
    #[arg(long, action = ArgAction::Help)]
    help: Option<bool>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

impl Cli {
    fn repo_settings(&self) -> RepoSettings {
        let defaults = RepoSettings::default();
        RepoSettings::new(
            self.registry_config.clone().unwrap_or(defaults.registry_config),
            self.repository_config.clone().unwrap_or(defaults.repository_config),
            self.repository_cache.clone().unwrap_or(defaults.repository_cache),
        )
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chartd=info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    miette::set_panic_hook();

    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let credentials = ClusterCredentials::load(cli.kubeconfig.as_deref())
        .await
        .into_diagnostic()
        .wrap_err_with(|| match &cli.kubeconfig {
            Some(path) => format!("Failed to initialize config with kubeconfig {}", path.display()),
            None => "Failed to infer cluster config".to_string(),
        })?;
    tracing::info!(host = %credentials.host, "Loaded cluster credentials");

    let settings = Arc::new(cli.repo_settings());
    tracing::debug!(
        registry_config = %settings.registry_config.display(),
        repository_config = %settings.repository_config.display(),
        repository_cache = %settings.repository_cache.display(),
        "Repository settings"
    );

    let factory = Arc::new(KubeContextFactory::new(credentials, settings.clone()));
    let state = AppState::new(factory, settings)
        .with_orchestrator(ReleaseOrchestrator::new().with_timeout(Duration::from_secs(cli.timeout)))
        .with_dependency_update(cli.dependency_update);

    let addr = format!("{}:{}", cli.host, cli.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .into_diagnostic()
        .wrap_err_with(|| format!("Failed to listen on {}", addr))?;
    tracing::info!(%addr, "Start to listen");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .into_diagnostic()
        .wrap_err("Server error")?;

    tracing::info!("chartd stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown signal received"),
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C; running until killed");
            std::future::pending::<()>().await;
        }
    }
}

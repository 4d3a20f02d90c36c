use anyhow::{Context, Result};
use snipbox_sandbox::{probe_network_isolation, NetworkIsolation, RunCoordinator};
use snipbox_store::MemoryStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;

pub mod config;
mod error;
pub mod http_server;

pub use config::{AppConfig, ConfigError, ServerConfig};
pub use error::ApiError;
pub use http_server::{create_router, start_server, timeout_message, AppState};

/// Startup options coming from the command line
#[derive(Debug, Clone, Default)]
pub struct ServerArgs {
    pub config_path: Option<PathBuf>,
    pub bind_address: Option<String>,
    pub port: Option<u16>,
    pub timeout: Option<Duration>,
    pub max_concurrent_runs: Option<usize>,
    pub verbose: bool,
    pub log_file: Option<PathBuf>,
}

impl ServerArgs {
    /// Load the config file and environment, then apply these flags on top
    pub fn resolve_config(&self) -> Result<AppConfig> {
        let mut config = AppConfig::load(self.config_path.as_deref())?;
        if let Some(addr) = &self.bind_address {
            config.server.bind_address = addr.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(timeout) = self.timeout {
            config.set_timeout(timeout);
        }
        if let Some(max) = self.max_concurrent_runs {
            config.coordinator.max_concurrent_runs = max;
        }
        config.validate()?;
        Ok(config)
    }
}

/// Install the global subscriber: ANSI stderr, plus a plain file layer when
/// `log_file` is set. Keep the returned guard alive to flush the file.
pub fn init_tracing(verbose: bool, log_file: Option<&std::path::Path>) -> Option<WorkerGuard> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let log_level = if verbose { "debug" } else { "info" };

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            let name = path
                .file_name()
                .map(|n| n.to_os_string())
                .unwrap_or_else(|| "snipbox.log".into());
            let file_appender = tracing_appender::rolling::never(dir, name);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(true),
        )
        .with(file_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(format!(
                    "snipbox={},snipbox_server={},snipbox_sandbox={},snipbox_store={},tower_http={}",
                    log_level, log_level, log_level, log_level, log_level
                ))
            }),
        )
        .try_init();

    guard
}

/// Build the store, runtime and coordinator described by `config`
pub async fn build_state(config: &AppConfig) -> Result<AppState> {
    if config.sandbox.network != NetworkIsolation::Disabled {
        match probe_network_isolation().await {
            Ok(()) => info!("Network isolation available"),
            Err(e) if config.sandbox.network == NetworkIsolation::Required => {
                warn!(
                    "Network isolation is required but unavailable ({}); every run will fail",
                    e
                );
            }
            Err(e) => warn!("Network isolation unavailable, runs keep host network: {}", e),
        }
    }

    let coordinator = RunCoordinator::from_config(
        config.sandbox.clone(),
        config.limits.clone(),
        config.coordinator.clone(),
    )
    .await
    .context("Failed to set up the sandbox")?;
    info!(
        "Runtime: {} (interpreter {}, {} concurrent runs, timeout {:?})",
        coordinator.runtime_name(),
        config.sandbox.interpreter.display(),
        coordinator.max_concurrent_runs(),
        config.limits.timeout
    );

    let store = MemoryStore::with_limits(config.store.clone());
    Ok(AppState::new(Arc::new(coordinator), Arc::new(store)))
}

/// Resolves on Ctrl-C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}

pub async fn run_server_app(args: ServerArgs) -> Result<()> {
    let _log_guard = init_tracing(args.verbose, args.log_file.as_deref());

    let config = args.resolve_config()?;
    let addr = config.socket_addr()?;

    info!("Starting snipbox server v{}", env!("CARGO_PKG_VERSION"));
    let state = build_state(&config).await?;
    let app = create_router(state, &config.server);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    start_server(listener, app, shutdown_signal()).await
}

//! sqlpod - SQL formatting pod
//!
//! Speaks bencode over stdin/stdout and exposes
//! `pod.xledger.tsql-scriptdom/reformat-sql`. Logs go to stderr.

use sqlpod_core::{Formatter, TsqlFormatter};
use sqlpod_server::{Config, MessageTransport, Server, ServerError, VariableRegistry};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// How long to wait for the blocking stdin reader on exit.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(100);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration (from file if SQLPOD_CONFIG is set, then env overrides)
    let config_path = std::env::var("SQLPOD_CONFIG").ok();
    let loaded = Config::load();
    let level = loaded
        .as_ref()
        .map(|c| c.logging.level.clone())
        .unwrap_or_else(|_| "info".to_string());

    // Initialize logging; stdout is reserved for protocol bytes
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let config = match loaded {
        Ok(c) => {
            if let Some(ref path) = config_path {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            // If a config file was explicitly specified, fail on error
            if config_path.is_some() {
                tracing::error!("Failed to load config: {}", e);
                return Err(ServerError::from(e).into());
            }
            tracing::info!("Using default configuration");
            Config::default()
        }
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(run(config));

    // tokio's stdin reader sits on a blocking thread until the peer writes
    // or closes; don't let it hold the process open after shutdown.
    runtime.shutdown_timeout(SHUTDOWN_GRACE);

    if let Err(ref e) = result {
        tracing::error!("Pod stopped with error: {}", e);
    }
    result.map_err(Into::into)
}

async fn run(config: Config) -> Result<(), ServerError> {
    config.validate()?;

    tracing::info!("Starting sqlpod {}", env!("CARGO_PKG_VERSION"));
    tracing::info!("  Read buffer: {} bytes", config.transport.read_buffer_size);
    tracing::info!(
        "  Max message size: {} bytes",
        config.transport.max_message_bytes
    );

    let formatter: Arc<dyn Formatter> = Arc::new(TsqlFormatter::new());
    let registry = Arc::new(VariableRegistry::with_builtins(formatter)?);
    for namespace in registry.describe() {
        tracing::info!("  Namespace {}: {}", namespace.name, namespace.vars.join(", "));
    }

    let transport = MessageTransport::with_config(
        tokio::io::stdin(),
        tokio::io::stdout(),
        &config.transport,
    );
    let mut server = Server::new(transport, registry);

    // Spawn shutdown signal handler
    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received shutdown signal, stopping pod...");
            shutdown.shutdown();
        }
    });

    if let Err(e) = server.run().await {
        if e.is_broken_pipe() {
            tracing::info!("Client went away: {}", e);
        } else {
            return Err(e);
        }
    }

    Ok(())
}

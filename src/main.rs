//! pairgate: WhatsApp linked-device pairing over HTTP.
//!
//! Subcommands:
//! - `start` serve the pairing API and page
//! - `pair`  pair interactively in the terminal
//! - `check` verify the sessions folder, connector, and version lookup
//! - `init`  write a starter config for a hosting platform

mod api;
mod frontend;
mod init;
mod pair;
mod selfcheck;
mod session;

use clap::{Parser, Subcommand};
use pairgate_core::config::{Config, Platform, DEFAULT_CONFIG_FILE};
use pairgate_core::credentials::CredentialStore;
use pairgate_upstream::build_connector;
use session::{SessionManager, SessionSettings};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(
    name = "pairgate",
    version,
    about = "WhatsApp linked-device pairing over HTTP"
)]
struct Cli {
    /// Path to the config file.
    #[arg(long, env = "PAIRGATE_CONFIG", default_value = DEFAULT_CONFIG_FILE, global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the pairing API.
    Start {
        /// Listen port (overrides PORT and the config file).
        #[arg(long)]
        port: Option<u16>,
        /// Platform profile: fly, railway, cyclic, generic, stub.
        #[arg(long)]
        platform: Option<Platform>,
    },
    /// Pair interactively in the terminal.
    Pair,
    /// Verify the setup.
    Check,
    /// Write a starter config file.
    Init {
        /// Platform profile to write defaults for.
        #[arg(long, default_value_t = Platform::Generic)]
        platform: Platform,
        /// Overwrite an existing config file.
        #[arg(long)]
        force: bool,
    },
}

/// Install the tracing subscriber. `PAIRGATE_LOG` wins over `default_level`.
///
/// When `[log].file` is set, a daily-rolling file is written alongside
/// stdout; the returned guard must live until exit to flush it.
fn init_logging(config: &Config, default_level: &str) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_env("PAIRGATE_LOG").unwrap_or_else(|_| EnvFilter::new(default_level));
    let stdout = fmt::layer().with_target(false);

    if config.log.file.is_empty() {
        tracing_subscriber::registry().with(filter).with(stdout).init();
        return None;
    }

    let appender = tracing_appender::rolling::daily(&config.log.file, "pairgate.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::registry()
        .with(filter)
        .with(stdout)
        .with(fmt::layer().with_ansi(false).with_writer(writer))
        .init();
    Some(guard)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Init { platform, force } => init::run(&cli.config, platform, force),
        Commands::Check => {
            let config = Config::load(&cli.config)?;
            let _guard = init_logging(&config, "warn");
            if !selfcheck::run(&config).await {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Pair => {
            let config = Config::load(&cli.config)?;
            // Keep the terminal quiet for the interactive prompts.
            let _guard = init_logging(&config, "warn");
            pair::run(&config).await
        }
        Commands::Start { port, platform } => {
            let mut config = Config::load(&cli.config)?;
            if let Some(platform) = platform {
                config.server.platform = platform;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            let level = config.log_level().to_string();
            let _guard = init_logging(&config, &level);
            start(config).await
        }
    }
}

async fn start(config: Config) -> anyhow::Result<()> {
    let store = CredentialStore::new(config.sessions_dir());
    store.ensure_dir()?;

    let connector = build_connector(&config);
    let sessions = Arc::new(SessionManager::new(
        connector,
        store,
        SessionSettings::from_config(&config),
    ));
    info!(
        "platform {}, connector {}, QR timeout {}s, sessions in {}",
        config.platform().label(),
        sessions.connector_name(),
        sessions.qr_timeout().as_secs(),
        config.sessions_dir().display()
    );

    // Closing the session inside the shutdown future releases pending
    // `/api/start` waiters, so graceful shutdown does not sit out the QR timeout.
    let shutdown = {
        let sessions = sessions.clone();
        async move {
            shutdown_signal().await;
            sessions.shutdown().await;
        }
    };

    let state = api::ApiState::new(sessions, config.platform(), &config.server.api_key);
    api::serve(&config.listen_addr(), state, config.serve_frontend(), shutdown).await?;

    info!("pairgate stopped");
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on unix (what hosting platforms send).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("failed to listen for SIGTERM: {e}");
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
    info!("shutdown requested");
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_start_flags_parse() {
        let cli = Cli::parse_from(["pairgate", "start", "--port", "8080", "--platform", "fly.io"]);
        match cli.command {
            Commands::Start { port, platform } => {
                assert_eq!(port, Some(8080));
                assert_eq!(platform, Some(Platform::Fly));
            }
            _ => panic!("expected start"),
        }
    }

    #[test]
    fn test_init_defaults_to_generic() {
        let cli = Cli::parse_from(["pairgate", "init"]);
        match cli.command {
            Commands::Init { platform, force } => {
                assert_eq!(platform, Platform::Generic);
                assert!(!force);
            }
            _ => panic!("expected init"),
        }
    }

    #[test]
    fn test_unknown_platform_rejected() {
        assert!(Cli::try_parse_from(["pairgate", "start", "--platform", "heroku"]).is_err());
    }
}

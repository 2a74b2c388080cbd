//! WebShell Server
//!
//! Serves interactive terminals to browser clients over WebSockets.

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use webshell::config::Config;
use webshell::logging::{self, LogFormat};
use webshell::{SessionBroker, SessionRegistry, TemplateResolver, WebShellServer};

/// WebShell - browser terminals backed by pseudo-terminals.
#[derive(Parser, Debug)]
#[command(name = "webshell")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the WebSocket server until SIGINT or SIGTERM
    Serve {
        /// Port to listen on
        #[arg(long, short)]
        port: Option<u16>,

        /// Address to bind to
        #[arg(long)]
        bind_address: Option<IpAddr>,

        /// Log level (trace, debug, info, warn, error)
        #[arg(long)]
        log_level: Option<String>,

        /// Log output format
        #[arg(long, value_enum)]
        log_format: Option<LogFormat>,

        /// Write logs to this file instead of stderr
        #[arg(long, value_name = "FILE")]
        log_output: Option<PathBuf>,
    },

    /// Print the effective configuration as TOML
    Config {
        /// Print the built-in defaults instead
        #[arg(long)]
        default: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default()?
    };
    config.apply_env_overrides();

    match cli.command {
        Commands::Serve {
            port,
            bind_address,
            log_level,
            log_format,
            log_output,
        } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(address) = bind_address {
                config.server.bind_address = address.to_string();
            }
            if let Some(level) = log_level {
                config.log.level = level;
            } else if cli.verbose {
                config.log.level = "debug".to_string();
            }
            if let Some(format) = log_format {
                config.log.format = format;
            }
            if log_output.is_some() {
                config.log.output = log_output;
            }

            config.validate()?;
            let _guard = logging::init(&config.log).context("Failed to initialize logging")?;
            if let Some(path) = &cli.config {
                tracing::info!("Using config file: {:?}", path);
            }

            run_server(config).await
        }
        Commands::Config { default } => {
            let shown = if default { Config::default() } else { config };
            print!("{}", shown.to_toml()?);
            Ok(())
        }
    }
}

async fn run_server(config: Config) -> anyhow::Result<()> {
    let registry = SessionRegistry::new();
    let broker = SessionBroker::new(registry, config.session.broker_config());
    let resolver = Arc::new(TemplateResolver::from_config(&config.session));

    let server = WebShellServer::bind(&config, broker, resolver).await?;
    tracing::info!(
        shells = ?config.session.shells,
        remote = !config.session.exec_template.is_empty(),
        max_sessions = config.server.max_sessions,
        "WebShell server starting"
    );

    let cancel = CancellationToken::new();
    let serving = tokio::spawn(server.serve(cancel.clone()));

    let signal = wait_for_shutdown_signal().await;
    tracing::info!("Shutting down...");
    cancel.cancel();
    serving.await.context("Server task failed")?;

    signal.context("Failed to listen for shutdown signals")
}

/// Wait for SIGTERM or SIGINT.
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_serve_flags() {
        let cli = Cli::parse_from([
            "webshell",
            "--verbose",
            "serve",
            "--port",
            "9000",
            "--bind-address",
            "127.0.0.1",
            "--log-format",
            "json",
        ]);

        assert!(cli.verbose);
        match cli.command {
            Commands::Serve {
                port,
                bind_address,
                log_format,
                log_level,
                log_output,
            } => {
                assert_eq!(port, Some(9000));
                assert_eq!(bind_address, Some("127.0.0.1".parse().unwrap()));
                assert_eq!(log_format, Some(LogFormat::Json));
                assert!(log_level.is_none());
                assert!(log_output.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_config_command() {
        let cli = Cli::parse_from(["webshell", "config", "--default", "-c", "/tmp/x.toml"]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/x.toml")));
        assert!(matches!(cli.command, Commands::Config { default: true }));
    }

    #[test]
    fn test_rejects_bad_bind_address() {
        let result = Cli::try_parse_from(["webshell", "serve", "--bind-address", "not-an-ip"]);
        assert!(result.is_err());
    }
}

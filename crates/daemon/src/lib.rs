//! # WebShell Server Library
//!
//! Relays interactive terminal sessions between WebSocket clients and
//! processes running on pseudo-terminals.
//!
//! ## Overview
//!
//! A browser terminal opens `/ws/{namespace}/{pod}/{container}/shell`. The
//! server upgrades the connection, resolves the target into a command,
//! spawns it on a PTY and binds the two together:
//!
//! ```text
//! ┌───────────┐  JSON frames  ┌────────────────────────────────┐   bytes   ┌─────────┐
//! │  browser  │ <───────────> │ WebShellServer ─> SessionBroker│ <───────> │   PTY   │
//! └───────────┘   WebSocket   │          SessionRegistry       │           └─────────┘
//!                             └────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use tokio_util::sync::CancellationToken;
//! use webshell::{Config, SessionBroker, SessionRegistry, TemplateResolver, WebShellServer};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!     let broker = SessionBroker::new(SessionRegistry::new(), config.session.broker_config());
//!     let resolver = Arc::new(TemplateResolver::from_config(&config.session));
//!
//!     let server = WebShellServer::bind(&config, broker, resolver).await?;
//!     server.serve(CancellationToken::new()).await;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`logging`]: Tracing subscriber setup
//! - [`resolver`]: Upgrade path parsing and command resolution
//! - [`server`]: WebSocket listener
//! - [`session`]: PTY sessions, the broker and the session registry

pub mod config;
pub mod logging;
pub mod resolver;
pub mod server;
pub mod session;

// Re-export protocol for convenience
pub use protocol;

pub use config::Config;
pub use resolver::{CommandResolver, ResolveError, ShellTarget, TemplateResolver};
pub use server::{ServerError, WebShellServer};
pub use session::{
    AttachError, BrokerConfig, CommandSpec, DetachReason, PtySession, Session, SessionBroker,
    SessionRegistry, SessionState, SessionSummary,
};

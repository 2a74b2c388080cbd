//! WebSocket listener.
//!
//! Each accepted TCP connection is upgraded with the shell path checked in
//! the handshake, then given a freshly spawned PTY through the
//! [`SessionBroker`]. The connection task lives until the session ends.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::resolver::{CommandResolver, ShellTarget};
use crate::session::{CommandSpec, PtySession, SessionBroker, SpawnError};

/// Pause after a failed `accept` before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Errors that can occur while starting the listener.
#[derive(Error, Debug)]
pub enum ServerError {
    /// The bind address is not an IP address.
    #[error("invalid listen address {0}")]
    InvalidAddress(String),

    /// The listener could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind { addr: String, source: io::Error },
}

#[derive(Debug, Clone)]
struct ConnectionSettings {
    handshake_timeout: Duration,
    max_sessions: usize,
    rows: u16,
    cols: u16,
    kill_grace: Duration,
}

/// Accepts WebSocket connections and turns each into a terminal session.
pub struct WebShellServer {
    listener: TcpListener,
    broker: SessionBroker,
    resolver: Arc<dyn CommandResolver>,
    settings: Arc<ConnectionSettings>,
}

impl WebShellServer {
    /// Binds the listener described by `config.server`.
    pub async fn bind(
        config: &Config,
        broker: SessionBroker,
        resolver: Arc<dyn CommandResolver>,
    ) -> Result<Self, ServerError> {
        let addr = format!("{}:{}", config.server.bind_address, config.server.port);
        let socket_addr: SocketAddr = match config.server.bind_address.parse() {
            Ok(ip) => SocketAddr::new(ip, config.server.port),
            Err(_) => return Err(ServerError::InvalidAddress(addr)),
        };

        let listener = TcpListener::bind(socket_addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;

        Ok(Self {
            listener,
            broker,
            resolver,
            settings: Arc::new(ConnectionSettings {
                handshake_timeout: config.server.handshake_timeout(),
                max_sessions: config.server.max_sessions,
                rows: config.session.default_rows,
                cols: config.session.default_cols,
                kill_grace: config.session.kill_grace(),
            }),
        })
    }

    /// Returns the address the listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Returns the broker sessions are attached through.
    pub fn broker(&self) -> &SessionBroker {
        &self.broker
    }

    /// Runs the accept loop until `cancel` fires, then detaches every session.
    pub async fn serve(self, cancel: CancellationToken) {
        match self.local_addr() {
            Ok(addr) => tracing::info!(%addr, "WebShell server listening"),
            Err(e) => tracing::warn!(error = %e, "Listening on unknown address"),
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("Server received cancel signal, stopping accept loop");
                    break;
                }
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let broker = self.broker.clone();
                            let resolver = Arc::clone(&self.resolver);
                            let settings = Arc::clone(&self.settings);
                            tokio::spawn(async move {
                                handle_connection(stream, peer, broker, resolver, settings).await;
                            });
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Failed to accept connection");
                            tokio::time::sleep(ACCEPT_BACKOFF).await;
                        }
                    }
                }
            }
        }

        self.broker.shutdown_all().await;
        tracing::info!("WebShell server stopped");
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    broker: SessionBroker,
    resolver: Arc<dyn CommandResolver>,
    settings: Arc<ConnectionSettings>,
) {
    let _ = stream.set_nodelay(true);

    let mut target: Option<ShellTarget> = None;
    let callback = |request: &Request, response: Response| {
        match ShellTarget::from_path(request.uri().path()) {
            Ok(parsed) => {
                target = Some(parsed);
                Ok(response)
            }
            Err(e) => {
                tracing::debug!(%peer, path = %request.uri().path(), error = %e, "Rejecting upgrade");
                Err(not_found(&e.to_string()))
            }
        }
    };

    let handshake = tokio::time::timeout(
        settings.handshake_timeout,
        tokio_tungstenite::accept_hdr_async(stream, callback),
    )
    .await;

    let websocket = match handshake {
        Ok(Ok(websocket)) => websocket,
        Ok(Err(e)) => {
            tracing::debug!(%peer, error = %e, "WebSocket handshake failed");
            return;
        }
        Err(_) => {
            tracing::debug!(%peer, "WebSocket handshake timed out");
            return;
        }
    };
    let Some(target) = target else {
        return;
    };

    if broker.registry().len() >= settings.max_sessions {
        tracing::warn!(%peer, max_sessions = settings.max_sessions, "Session limit reached");
        reject(websocket, CloseCode::Again, "too many sessions").await;
        return;
    }

    let candidates = match resolver.resolve(&target) {
        Ok(candidates) => candidates,
        Err(e) => {
            tracing::warn!(%peer, %target, error = %e, "Failed to resolve shell");
            reject(websocket, CloseCode::Error, "no shell available").await;
            return;
        }
    };

    let spawned = spawn_first(candidates, settings.rows, settings.cols, settings.kill_grace);
    let pty = match spawned.await {
        Ok(pty) => pty,
        Err(e) => {
            tracing::warn!(%peer, %target, error = %e, "Failed to start shell");
            reject(websocket, CloseCode::Error, "failed to start shell").await;
            return;
        }
    };

    match broker.attach(peer.to_string(), target, websocket, pty).await {
        Ok(session) => session.closed().await,
        Err(e) => tracing::warn!(%peer, error = %e, "Failed to attach session"),
    }
}

/// Spawns the first candidate that starts, in order.
///
/// Allocation and fork run on the blocking pool.
pub async fn spawn_first(
    candidates: Vec<CommandSpec>,
    rows: u16,
    cols: u16,
    kill_grace: Duration,
) -> Result<PtySession, SpawnError> {
    tokio::task::spawn_blocking(move || spawn_first_blocking(&candidates, rows, cols, kill_grace))
        .await
        .map_err(|e| SpawnError::PtyAllocationFailed(format!("spawn task failed: {e}")))?
}

fn spawn_first_blocking(
    candidates: &[CommandSpec],
    rows: u16,
    cols: u16,
    kill_grace: Duration,
) -> Result<PtySession, SpawnError> {
    let mut last_error = None;
    for command in candidates {
        match PtySession::spawn_with_grace(command, rows, cols, kill_grace) {
            Ok(pty) => return Ok(pty),
            Err(e) => {
                tracing::debug!(command = %command.display(), error = %e, "Shell candidate failed");
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| SpawnError::ProcessStartFailed {
        program: String::new(),
        reason: "no candidates".to_string(),
    }))
}

fn not_found(message: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(message.to_string()));
    *response.status_mut() = StatusCode::NOT_FOUND;
    response
}

async fn reject<S>(mut websocket: WebSocketStream<S>, code: CloseCode, reason: &str)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let frame = CloseFrame {
        code,
        reason: reason.to_string().into(),
    };
    if let Err(e) = websocket.close(Some(frame)).await {
        tracing::debug!(error = %e, "Failed to send close frame");
    }
}

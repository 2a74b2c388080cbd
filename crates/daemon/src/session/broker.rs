//! Binds one WebSocket connection to one PTY session.
//!
//! [`SessionBroker::attach`] starts two pumps per session:
//!
//! ```text
//!   WebSocket ──decode──> inbound pump ──write_input / resize──> PtySession
//!   WebSocket <──encode── outbound pump <──────output chunks──── PtySession
//! ```
//!
//! Either pump failing, the client hanging up or the process exiting ends
//! in [`Session::detach`], which cancels both pumps, closes the process and
//! the connection, and removes the session from the registry.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use protocol::{Frame, FrameCodec, Utf8Reassembler};
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{watch, Mutex};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::pty::{IoError, OutputStream, PtySession};
use super::registry::{RegistryError, SessionRegistry, SessionSummary};
use crate::resolver::ShellTarget;

/// Unique identifier for a session.
pub type SessionId = String;

/// Identity of the connection a session is attached to.
pub type ConnectionId = String;

/// Byte written to the process when the client hangs up cleanly.
const END_OF_TRANSMISSION: u8 = 0x04;

/// Default number of consecutive malformed frames tolerated before detaching.
pub const DEFAULT_MALFORMED_FRAME_THRESHOLD: u32 = 32;

/// Default sequence written to the shell right after attaching.
pub const DEFAULT_INIT_SEQUENCE: &str = "export TERM=xterm && clear \r";

type OutboundSink = Pin<Box<dyn Sink<Message, Error = WsError> + Send>>;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Both pumps are running.
    Attached,
    /// Detach is in progress.
    Detaching,
    /// The process and the connection are closed.
    Terminated,
}

/// Why a session was detached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetachReason {
    /// The client closed the connection.
    ClientClosed,
    /// Reading from the connection failed.
    ConnectionError,
    /// The process exited.
    ProcessExited,
    /// Writing to the process failed.
    InputFailed,
    /// Resizing the pty failed.
    ResizeFailed,
    /// Sending output to the client failed.
    OutputFailed,
    /// Too many consecutive malformed frames.
    MalformedFrames,
    /// Detach was requested by the host.
    Requested,
    /// The server is shutting down.
    Shutdown,
}

impl DetachReason {
    /// Returns a short label for logs and close frames.
    pub fn as_str(self) -> &'static str {
        match self {
            DetachReason::ClientClosed => "client closed",
            DetachReason::ConnectionError => "connection error",
            DetachReason::ProcessExited => "process exited",
            DetachReason::InputFailed => "input failed",
            DetachReason::ResizeFailed => "resize failed",
            DetachReason::OutputFailed => "output failed",
            DetachReason::MalformedFrames => "too many malformed frames",
            DetachReason::Requested => "detached",
            DetachReason::Shutdown => "server shutting down",
        }
    }

    fn close_code(self) -> CloseCode {
        match self {
            DetachReason::ClientClosed | DetachReason::ProcessExited | DetachReason::Requested => {
                CloseCode::Normal
            }
            DetachReason::Shutdown => CloseCode::Away,
            DetachReason::MalformedFrames => CloseCode::Policy,
            DetachReason::ConnectionError
            | DetachReason::InputFailed
            | DetachReason::ResizeFailed
            | DetachReason::OutputFailed => CloseCode::Error,
        }
    }
}

impl std::fmt::Display for DetachReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur when attaching a connection.
#[derive(Error, Debug)]
pub enum AttachError {
    /// The connection already owns a live session.
    #[error("connection {0} already has an active session")]
    AlreadyAttached(ConnectionId),

    /// The PTY's output has already been consumed elsewhere.
    #[error("pty output has already been taken")]
    OutputTaken,

    /// The initial handshake could not be written to the process.
    #[error("failed to write initial handshake: {0}")]
    Handshake(IoError),
}

/// Broker tuning.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Consecutive malformed frames that trigger a detach.
    pub malformed_frame_threshold: u32,
    /// Bytes written to the process before user input is relayed.
    pub init_sequence: Option<String>,
    /// Upper bound on sending the close frame during detach.
    pub close_timeout: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            malformed_frame_threshold: DEFAULT_MALFORMED_FRAME_THRESHOLD,
            init_sequence: Some(DEFAULT_INIT_SEQUENCE.to_string()),
            close_timeout: Duration::from_secs(1),
        }
    }
}

struct SessionShared {
    id: SessionId,
    connection: ConnectionId,
    target: ShellTarget,
    created_at: u64,
    pty: Arc<PtySession>,
    sink: Mutex<Option<OutboundSink>>,
    cancel: CancellationToken,
    state: watch::Sender<SessionState>,
    detached: AtomicBool,
    registry: SessionRegistry,
    close_timeout: Duration,
}

/// Handle to one attached terminal. Cheap to clone.
#[derive(Clone)]
pub struct Session {
    shared: Arc<SessionShared>,
}

/// Non-owning reference to a session, held by the registry.
#[derive(Clone)]
pub(crate) struct WeakSession(Weak<SessionShared>);

impl WeakSession {
    pub(crate) fn upgrade(&self) -> Option<Session> {
        self.0.upgrade().map(|shared| Session { shared })
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.shared.id)
            .field("connection", &self.shared.connection)
            .field("target", &self.shared.target)
            .field("state", &self.state())
            .finish()
    }
}

impl Session {
    /// Returns the session ID.
    pub fn id(&self) -> &SessionId {
        &self.shared.id
    }

    /// Returns the identity of the attached connection.
    pub fn connection(&self) -> &ConnectionId {
        &self.shared.connection
    }

    /// Returns the target this session was opened for.
    pub fn target(&self) -> &ShellTarget {
        &self.shared.target
    }

    /// Returns the creation time in Unix milliseconds.
    pub fn created_at(&self) -> u64 {
        self.shared.created_at
    }

    /// Returns the current state.
    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    /// Returns the PTY session owned by this session.
    pub fn pty(&self) -> &PtySession {
        &self.shared.pty
    }

    /// Returns the terminal size as `(rows, cols)`.
    pub fn dimensions(&self) -> (u16, u16) {
        self.shared.pty.size()
    }

    /// Returns a snapshot for listing.
    pub fn summary(&self) -> SessionSummary {
        let (rows, cols) = self.dimensions();
        SessionSummary {
            id: self.shared.id.clone(),
            connection: self.shared.connection.clone(),
            target: self.shared.target.to_string(),
            command: self.shared.pty.program().to_string(),
            pid: self.shared.pty.pid(),
            rows,
            cols,
            created_at: self.shared.created_at,
            state: self.state(),
        }
    }

    /// Waits until the session has terminated.
    pub async fn closed(&self) {
        let mut rx = self.shared.state.subscribe();
        // The sender lives in `self`, so this only returns once terminated.
        let _ = rx.wait_for(|state| *state == SessionState::Terminated).await;
    }

    /// Stops both pumps, closes the process and the connection, and
    /// unregisters the session.
    ///
    /// Only the first call does any work; later calls return immediately.
    pub async fn detach(&self, reason: DetachReason) {
        if self.shared.detached.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.state.send_replace(SessionState::Detaching);

        tracing::info!(
            session_id = %self.shared.id,
            connection = %self.shared.connection,
            reason = %reason,
            "Detaching session"
        );

        self.shared.cancel.cancel();
        self.shared.pty.close().await;
        self.close_connection(reason).await;
        self.shared.registry.unregister(&self.shared.id);

        self.shared.state.send_replace(SessionState::Terminated);
        tracing::debug!(session_id = %self.shared.id, "Session terminated");
    }

    pub(crate) fn downgrade(&self) -> WeakSession {
        WeakSession(Arc::downgrade(&self.shared))
    }

    async fn send_text(&self, text: String) -> Result<(), WsError> {
        let mut guard = self.shared.sink.lock().await;
        match guard.as_mut() {
            Some(sink) => sink.send(Message::Text(text)).await,
            None => Err(WsError::ConnectionClosed),
        }
    }

    async fn close_connection(&self, reason: DetachReason) {
        let Some(mut sink) = self.shared.sink.lock().await.take() else {
            return;
        };

        let frame = CloseFrame {
            code: reason.close_code(),
            reason: reason.as_str().into(),
        };
        let result = tokio::time::timeout(self.shared.close_timeout, async {
            sink.send(Message::Close(Some(frame))).await?;
            sink.close().await
        })
        .await;

        match result {
            Ok(Ok(())) | Ok(Err(WsError::ConnectionClosed)) | Ok(Err(WsError::AlreadyClosed)) => {}
            Ok(Err(e)) => {
                tracing::debug!(session_id = %self.shared.id, error = %e, "Error closing connection");
            }
            Err(_) => {
                tracing::debug!(session_id = %self.shared.id, "Timed out closing connection");
            }
        }
    }
}

/// Attaches connections to PTY sessions and keeps them in the registry.
#[derive(Clone)]
pub struct SessionBroker {
    registry: SessionRegistry,
    config: Arc<BrokerConfig>,
    codec: FrameCodec,
}

impl SessionBroker {
    /// Creates a broker that registers sessions in `registry`.
    pub fn new(registry: SessionRegistry, config: BrokerConfig) -> Self {
        Self {
            registry,
            config: Arc::new(config),
            codec: FrameCodec::new(),
        }
    }

    /// Replaces the frame codec.
    pub fn with_codec(mut self, codec: FrameCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Returns the registry sessions are recorded in.
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Returns the broker configuration.
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Binds `websocket` to `pty` and starts relaying.
    ///
    /// On error the PTY session is closed and the connection dropped.
    pub async fn attach<S>(
        &self,
        connection: ConnectionId,
        target: ShellTarget,
        websocket: WebSocketStream<S>,
        pty: PtySession,
    ) -> Result<Session, AttachError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let Some(output) = pty.output() else {
            pty.close().await;
            return Err(AttachError::OutputTaken);
        };

        let (sink, stream) = websocket.split();
        let (state, _) = watch::channel(SessionState::Attached);

        let session = Session {
            shared: Arc::new(SessionShared {
                id: Uuid::new_v4().to_string(),
                connection,
                target,
                created_at: now_millis(),
                pty: Arc::new(pty),
                sink: Mutex::new(Some(Box::pin(sink))),
                cancel: CancellationToken::new(),
                state,
                detached: AtomicBool::new(false),
                registry: self.registry.clone(),
                close_timeout: self.config.close_timeout,
            }),
        };

        if let Err(e) = self.registry.register(&session) {
            session.shared.detached.store(true, Ordering::SeqCst);
            session.shared.pty.close().await;
            session.shared.state.send_replace(SessionState::Terminated);
            return Err(match e {
                RegistryError::DuplicateConnection(conn) => AttachError::AlreadyAttached(conn),
                RegistryError::DuplicateSession(id) => AttachError::AlreadyAttached(id),
            });
        }

        if let Some(ref init) = self.config.init_sequence {
            if let Err(e) = session.pty().write_input(init.as_bytes()).await {
                session.detach(DetachReason::InputFailed).await;
                return Err(AttachError::Handshake(e));
            }
        }

        tokio::spawn(run_inbound(
            session.clone(),
            stream,
            self.codec.clone(),
            self.config.malformed_frame_threshold.max(1),
        ));
        tokio::spawn(run_outbound(session.clone(), output, self.codec.clone()));

        let (rows, cols) = session.dimensions();
        tracing::info!(
            session_id = %session.id(),
            connection = %session.connection(),
            target = %session.target(),
            command = %session.pty().program(),
            rows,
            cols,
            "Session attached"
        );

        Ok(session)
    }

    /// Detaches a session on behalf of the host. Idempotent.
    pub async fn detach(&self, session: &Session) {
        session.detach(DetachReason::Requested).await;
    }

    /// Detaches every registered session.
    pub async fn shutdown_all(&self) {
        self.registry.shutdown_all().await;
    }
}

/// Returns the detach reason if `next` means the client is gone.
fn hangup_reason(next: &Option<Result<Message, WsError>>) -> Option<DetachReason> {
    match next {
        Some(Ok(Message::Close(_))) | None => Some(DetachReason::ClientClosed),
        Some(Err(_)) => Some(DetachReason::ConnectionError),
        Some(Ok(_)) => None,
    }
}

/// Connection -> process pump.
///
/// While a stdin write waits on a stalled process, at most one further
/// message is read ahead so a hangup is still noticed.
async fn run_inbound<St>(session: Session, mut stream: St, codec: FrameCodec, threshold: u32)
where
    St: Stream<Item = Result<Message, WsError>> + Unpin + Send + 'static,
{
    let cancel = session.shared.cancel.clone();
    let pty = Arc::clone(&session.shared.pty);
    let mut consecutive_malformed: u32 = 0;
    let mut lookahead: Option<Option<Result<Message, WsError>>> = None;

    let reason = 'pump: loop {
        let next = match lookahead.take() {
            Some(next) => next,
            None => tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                next = stream.next() => next,
            },
        };

        let payload = match next {
            Some(Ok(Message::Text(text))) => text.into_bytes(),
            Some(Ok(Message::Binary(data))) => data,
            Some(Ok(Message::Close(frame))) => {
                tracing::debug!(session_id = %session.id(), frame = ?frame, "Client sent close");
                let eot = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    eot = tokio::time::timeout(
                        session.shared.close_timeout,
                        pty.write_input(&[END_OF_TRANSMISSION]),
                    ) => eot,
                };
                match eot {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::debug!(
                        session_id = %session.id(),
                        error = %e,
                        "Failed to forward end-of-transmission"
                    ),
                    Err(_) => tracing::debug!(
                        session_id = %session.id(),
                        "Timed out forwarding end-of-transmission"
                    ),
                }
                break DetachReason::ClientClosed;
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                tracing::debug!(session_id = %session.id(), error = %e, "Connection read failed");
                break DetachReason::ConnectionError;
            }
            None => break DetachReason::ClientClosed,
        };

        let frame = match codec.decode(&payload) {
            Ok(frame) => {
                consecutive_malformed = 0;
                frame
            }
            Err(e) => {
                consecutive_malformed += 1;
                tracing::warn!(
                    session_id = %session.id(),
                    error = %e,
                    consecutive = consecutive_malformed,
                    "Dropping malformed frame"
                );
                if consecutive_malformed >= threshold {
                    break DetachReason::MalformedFrames;
                }
                continue;
            }
        };

        match frame {
            Frame::Stdin { data } => {
                let write = pty.write_input(&data);
                tokio::pin!(write);
                let written = loop {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return,
                        written = &mut write => break written,
                        next = stream.next(), if lookahead.is_none() => {
                            if let Some(reason) = hangup_reason(&next) {
                                tracing::debug!(
                                    session_id = %session.id(),
                                    reason = %reason,
                                    "Client left with input pending"
                                );
                                break 'pump reason;
                            }
                            lookahead = Some(next);
                        }
                    }
                };
                if let Err(e) = written {
                    tracing::warn!(session_id = %session.id(), error = %e, "Failed to write to PTY");
                    break DetachReason::InputFailed;
                }
            }
            Frame::Resize { rows, cols } => {
                if let Err(e) = pty.resize(rows, cols) {
                    tracing::warn!(session_id = %session.id(), error = %e, "Failed to resize PTY");
                    break DetachReason::ResizeFailed;
                }
            }
            Frame::Stdout { .. } => {
                tracing::debug!(session_id = %session.id(), "Ignoring stdout frame from client");
            }
        }
    };

    session.detach(reason).await;
}

/// Process -> connection pump.
async fn run_outbound(session: Session, mut output: OutputStream, codec: FrameCodec) {
    let cancel = session.shared.cancel.clone();
    let mut utf8 = Utf8Reassembler::new();

    let reason = loop {
        let chunk = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            chunk = output.next_chunk() => chunk,
        };

        let (data, finished) = match chunk {
            Some(chunk) => (utf8.push(&chunk), false),
            None => (utf8.finish(), true),
        };

        if !data.is_empty() {
            let text = codec.encode(&Frame::Stdout { data });
            let sent = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                sent = session.send_text(text) => sent,
            };
            if let Err(e) = sent {
                tracing::debug!(session_id = %session.id(), error = %e, "Failed to send output");
                break DetachReason::OutputFailed;
            }
        }

        if finished {
            break DetachReason::ProcessExited;
        }
    };

    session.detach(reason).await;
}

/// Returns the current Unix timestamp in milliseconds.
fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::test_support::{cat, sh, ws_pair};
    use tokio::time::timeout;

    fn target() -> ShellTarget {
        ShellTarget::new("default", "web", "app")
    }

    fn quiet_broker(threshold: u32) -> SessionBroker {
        SessionBroker::new(
            SessionRegistry::new(),
            BrokerConfig {
                malformed_frame_threshold: threshold,
                init_sequence: None,
                close_timeout: Duration::from_millis(500),
            },
        )
    }

    #[test]
    fn test_close_codes() {
        assert_eq!(DetachReason::ProcessExited.close_code(), CloseCode::Normal);
        assert_eq!(DetachReason::MalformedFrames.close_code(), CloseCode::Policy);
        assert_eq!(DetachReason::Shutdown.close_code(), CloseCode::Away);
        assert_eq!(DetachReason::OutputFailed.close_code(), CloseCode::Error);
    }

    #[test]
    fn test_hangup_reason() {
        assert_eq!(hangup_reason(&None), Some(DetachReason::ClientClosed));
        assert_eq!(
            hangup_reason(&Some(Ok(Message::Close(None)))),
            Some(DetachReason::ClientClosed)
        );
        assert_eq!(
            hangup_reason(&Some(Err(WsError::ConnectionClosed))),
            Some(DetachReason::ConnectionError)
        );
        assert_eq!(hangup_reason(&Some(Ok(Message::Text("{}".into())))), None);
        assert_eq!(hangup_reason(&Some(Ok(Message::Ping(Vec::new())))), None);
    }

    #[tokio::test]
    async fn test_attach_registers_session() {
        let broker = quiet_broker(8);
        let (server, _client) = ws_pair().await;

        let session = broker
            .attach("conn-1".to_string(), target(), server, sh())
            .await
            .unwrap();

        assert_eq!(session.state(), SessionState::Attached);
        assert_eq!(broker.registry().len(), 1);
        assert!(broker.registry().get(session.id()).is_some());

        broker.detach(&session).await;
    }

    #[tokio::test]
    async fn test_attach_rejects_taken_output() {
        let broker = quiet_broker(8);
        let (server, _client) = ws_pair().await;
        let pty = sh();
        let _output = pty.output();

        let result = broker.attach("conn-1".to_string(), target(), server, pty).await;
        assert!(matches!(result, Err(AttachError::OutputTaken)));
        assert!(broker.registry().is_empty());
    }

    #[tokio::test]
    async fn test_attach_rejects_duplicate_connection() {
        let broker = quiet_broker(8);
        let (server1, _client1) = ws_pair().await;
        let (server2, _client2) = ws_pair().await;

        let first = broker
            .attach("conn-1".to_string(), target(), server1, sh())
            .await
            .unwrap();

        let second_pty = sh();
        let result = broker
            .attach("conn-1".to_string(), target(), server2, second_pty)
            .await;
        assert!(matches!(result, Err(AttachError::AlreadyAttached(ref c)) if c == "conn-1"));

        // The first session is untouched.
        assert_eq!(broker.registry().len(), 1);
        assert_eq!(first.state(), SessionState::Attached);

        broker.detach(&first).await;
    }

    #[tokio::test]
    async fn test_detach_is_idempotent() {
        let broker = quiet_broker(8);
        let (server, _client) = ws_pair().await;

        let session = broker
            .attach("conn-1".to_string(), target(), server, cat())
            .await
            .unwrap();

        broker.detach(&session).await;
        assert_eq!(session.state(), SessionState::Terminated);
        assert!(broker.registry().is_empty());

        broker.detach(&session).await;
        session.detach(DetachReason::Shutdown).await;
        assert_eq!(session.state(), SessionState::Terminated);
        assert_eq!(session.pty().state(), crate::session::PtyState::Closed);
    }

    #[tokio::test]
    async fn test_concurrent_detach() {
        let broker = quiet_broker(8);
        let (server, _client) = ws_pair().await;

        let session = broker
            .attach("conn-1".to_string(), target(), server, cat())
            .await
            .unwrap();

        let a = session.clone();
        let b = session.clone();
        let (_, _) = tokio::join!(
            a.detach(DetachReason::Requested),
            b.detach(DetachReason::Shutdown)
        );

        timeout(Duration::from_secs(5), session.closed()).await.unwrap();
        assert!(broker.registry().is_empty());
    }

    #[tokio::test]
    async fn test_init_sequence_written() {
        let broker = SessionBroker::new(
            SessionRegistry::new(),
            BrokerConfig {
                init_sequence: Some("echo init_marker_$((6*7))\n".to_string()),
                ..BrokerConfig::default()
            },
        );
        let (server, mut client) = ws_pair().await;

        let session = broker
            .attach("conn-1".to_string(), target(), server, sh())
            .await
            .unwrap();

        let mut seen = String::new();
        let found = timeout(Duration::from_secs(5), async {
            while let Some(Ok(msg)) = client.next().await {
                if let Message::Text(text) = msg {
                    let frame = FrameCodec::new().decode(text.as_bytes()).unwrap();
                    seen.push_str(&String::from_utf8_lossy(frame.data().unwrap_or_default()));
                    if seen.contains("init_marker_42") {
                        return true;
                    }
                }
            }
            false
        })
        .await;
        assert_eq!(found, Ok(true));

        broker.detach(&session).await;
    }

    #[tokio::test]
    async fn test_summary_reflects_session() {
        let broker = quiet_broker(8);
        let (server, _client) = ws_pair().await;

        let session = broker
            .attach("10.0.0.1:5000".to_string(), target(), server, sh())
            .await
            .unwrap();

        let summaries = broker.registry().list_active();
        assert_eq!(summaries.len(), 1);
        let summary = &summaries[0];
        assert_eq!(summary.id, *session.id());
        assert_eq!(summary.connection, "10.0.0.1:5000");
        assert_eq!(summary.target, "default/web/app");
        assert_eq!((summary.rows, summary.cols), (24, 80));
        assert_eq!(summary.state, SessionState::Attached);
        assert!(summary.created_at > 0);

        let json = serde_json::to_value(summary).unwrap();
        assert_eq!(json["state"], "attached");

        broker.detach(&session).await;
        assert!(broker.registry().list_active().is_empty());
    }
}

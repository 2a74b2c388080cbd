//! Session management module.
//!
//! This module provides PTY spawning, the broker that binds a WebSocket
//! connection to a PTY, and the registry of live sessions.

pub mod broker;
pub mod pty;
pub mod registry;

pub use broker::{
    AttachError, BrokerConfig, ConnectionId, DetachReason, Session, SessionBroker, SessionId,
    SessionState, DEFAULT_INIT_SEQUENCE, DEFAULT_MALFORMED_FRAME_THRESHOLD,
};
pub use pty::{CommandSpec, IoError, OutputStream, PtySession, PtyState, SpawnError};
pub use registry::{RegistryError, SessionRegistry, SessionSummary};

//! # WebShell Protocol Library
//!
//! This crate defines the messages exchanged between a browser terminal and
//! the WebShell daemon, and the codec that turns them into WebSocket payloads.
//!
//! ## Overview
//!
//! Every WebSocket message carries exactly one JSON object with an `op` tag:
//!
//! ```text
//! client -> server   {"op":"stdin","data":"ls -la\r"}
//! client -> server   {"op":"resize","cols":120,"rows":40}
//! server -> client   {"op":"stdout","data":"total 8\r\n..."}
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{Frame, FrameCodec};
//!
//! let codec = FrameCodec::new();
//!
//! let frame = codec.decode(br#"{"op":"resize","rows":40,"cols":120}"#).unwrap();
//! assert_eq!(frame, Frame::Resize { rows: 40, cols: 120 });
//!
//! let wire = codec.encode(&Frame::stdout("hello\r\n"));
//! assert!(wire.contains(r#""op":"stdout""#));
//! ```
//!
//! ## Modules
//!
//! - [`messages`]: Frame definitions and operation tags
//! - [`framing`]: JSON frame codec
//! - [`utf8`]: Reassembly of UTF-8 text split across output chunks
//! - [`error`]: Error types

pub mod error;
pub mod framing;
pub mod messages;
pub mod utf8;

pub use error::{DecodeError, Result};
pub use framing::{FrameCodec, MAX_DIMENSION};
pub use messages::{Frame, Op};
pub use utf8::Utf8Reassembler;

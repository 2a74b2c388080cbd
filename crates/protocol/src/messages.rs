//! Frame definitions for the terminal protocol.
//!
//! A frame is one JSON object carried by one WebSocket message. The `op`
//! field selects the variant; see [`crate::framing`] for the wire layout.

use std::fmt;
use std::str::FromStr;

use crate::error::DecodeError;

/// Operation tag carried in the `op` field of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    /// Keyboard input from the client, destined for the process.
    Stdin,
    /// Terminal output from the process, destined for the client.
    Stdout,
    /// New terminal dimensions reported by the client.
    Resize,
}

impl Op {
    /// Returns the wire spelling of this operation.
    pub fn as_str(self) -> &'static str {
        match self {
            Op::Stdin => "stdin",
            Op::Stdout => "stdout",
            Op::Resize => "resize",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Op {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stdin" => Ok(Op::Stdin),
            "stdout" => Ok(Op::Stdout),
            "resize" => Ok(Op::Resize),
            other => Err(DecodeError::UnknownOp(other.to_string())),
        }
    }
}

/// A decoded protocol message.
///
/// `data` may be empty but is always present for stdin and stdout frames.
/// Resize dimensions are always non-zero; the codec refuses to build a
/// `Resize` frame otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Raw terminal input bytes.
    Stdin { data: Vec<u8> },
    /// Raw terminal output bytes.
    Stdout { data: Vec<u8> },
    /// Terminal resize request.
    Resize { rows: u16, cols: u16 },
}

impl Frame {
    /// Builds a stdin frame.
    pub fn stdin(data: impl Into<Vec<u8>>) -> Self {
        Frame::Stdin { data: data.into() }
    }

    /// Builds a stdout frame.
    pub fn stdout(data: impl Into<Vec<u8>>) -> Self {
        Frame::Stdout { data: data.into() }
    }

    /// Builds a resize frame, or `None` if either dimension is zero.
    pub fn resize(rows: u16, cols: u16) -> Option<Self> {
        if rows == 0 || cols == 0 {
            return None;
        }
        Some(Frame::Resize { rows, cols })
    }

    /// Returns the operation tag of this frame.
    pub fn op(&self) -> Op {
        match self {
            Frame::Stdin { .. } => Op::Stdin,
            Frame::Stdout { .. } => Op::Stdout,
            Frame::Resize { .. } => Op::Resize,
        }
    }

    /// Returns the byte payload of a stdin or stdout frame.
    pub fn data(&self) -> Option<&[u8]> {
        match self {
            Frame::Stdin { data } | Frame::Stdout { data } => Some(data),
            Frame::Resize { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_op_parse() {
        assert_eq!("stdin".parse::<Op>().unwrap(), Op::Stdin);
        assert_eq!("stdout".parse::<Op>().unwrap(), Op::Stdout);
        assert_eq!("resize".parse::<Op>().unwrap(), Op::Resize);
    }

    #[test]
    fn test_op_parse_is_case_sensitive() {
        assert_eq!(
            "STDIN".parse::<Op>(),
            Err(DecodeError::UnknownOp("STDIN".to_string()))
        );
    }

    #[test]
    fn test_op_display_matches_wire() {
        for op in [Op::Stdin, Op::Stdout, Op::Resize] {
            assert_eq!(op.to_string().parse::<Op>().unwrap(), op);
        }
    }

    #[test]
    fn test_resize_rejects_zero() {
        assert!(Frame::resize(0, 80).is_none());
        assert!(Frame::resize(24, 0).is_none());
        assert_eq!(
            Frame::resize(24, 80),
            Some(Frame::Resize { rows: 24, cols: 80 })
        );
    }

    #[test]
    fn test_frame_accessors() {
        let frame = Frame::stdin("ls\r");
        assert_eq!(frame.op(), Op::Stdin);
        assert_eq!(frame.data(), Some(&b"ls\r"[..]));

        let frame = Frame::stdout(Vec::new());
        assert_eq!(frame.op(), Op::Stdout);
        assert_eq!(frame.data(), Some(&b""[..]));

        let frame = Frame::Resize { rows: 1, cols: 1 };
        assert_eq!(frame.op(), Op::Resize);
        assert!(frame.data().is_none());
    }
}

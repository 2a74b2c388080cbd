//! JSON frame codec.
//!
//! # Frame Format
//!
//! Each WebSocket message holds a single JSON object:
//!
//! - `{"op":"stdin","data":"<text>"}`
//! - `{"op":"stdout","data":"<text>"}`
//! - `{"op":"resize","rows":<int>,"cols":<int>}`
//!
//! Unknown fields are ignored. Terminal bytes travel as JSON strings, so
//! stdout payloads are emitted as UTF-8 text; invalid sequences are replaced
//! with U+FFFD. Use [`crate::Utf8Reassembler`] upstream of the encoder to
//! keep multibyte characters that straddle output chunks intact.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{DecodeError, Result};
use crate::messages::{Frame, Op};

/// Largest accepted terminal dimension.
pub const MAX_DIMENSION: i64 = u16::MAX as i64;

/// Default upper bound on an inbound payload (1 MB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Loose view of an inbound object; validation happens in [`FrameCodec::decode`].
#[derive(Debug, Deserialize)]
struct WireFrame {
    op: String,
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    rows: Option<i64>,
    #[serde(default)]
    cols: Option<i64>,
}

/// Encoder and decoder for terminal frames.
///
/// The codec is stateless: decoding and encoding are pure functions of
/// their input.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    /// Create a codec with the default size limit.
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Create a codec that rejects inbound payloads larger than `max` bytes.
    pub fn with_max_frame_size(max: usize) -> Self {
        Self {
            max_frame_size: max,
        }
    }

    /// Returns the inbound payload size limit.
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Decode one inbound payload.
    ///
    /// The raw bytes may come from either a text or a binary WebSocket
    /// message; both are parsed as JSON.
    pub fn decode(&self, raw: &[u8]) -> Result<Frame> {
        if raw.len() > self.max_frame_size {
            return Err(DecodeError::Malformed(format!(
                "frame too large: {} bytes exceeds maximum of {} bytes",
                raw.len(),
                self.max_frame_size
            )));
        }

        let value: Value = serde_json::from_slice(raw)?;
        if !value.is_object() {
            return Err(DecodeError::Malformed(
                "frame must be a JSON object".to_string(),
            ));
        }
        let wire: WireFrame = serde_json::from_value(value)?;

        match wire.op.parse::<Op>()? {
            Op::Stdin => Ok(Frame::Stdin {
                data: require_data(wire.data, Op::Stdin)?,
            }),
            Op::Stdout => Ok(Frame::Stdout {
                data: require_data(wire.data, Op::Stdout)?,
            }),
            Op::Resize => {
                // Absent dimensions count as zero, which is rejected below.
                let rows = wire.rows.unwrap_or(0);
                let cols = wire.cols.unwrap_or(0);
                if !(1..=MAX_DIMENSION).contains(&rows) || !(1..=MAX_DIMENSION).contains(&cols) {
                    return Err(DecodeError::InvalidDimensions { rows, cols });
                }
                Ok(Frame::Resize {
                    rows: rows as u16,
                    cols: cols as u16,
                })
            }
        }
    }

    /// Encode a frame into the text of one WebSocket message.
    pub fn encode(&self, frame: &Frame) -> String {
        let value = match frame {
            Frame::Stdin { data } => json!({
                "op": Op::Stdin.as_str(),
                "data": String::from_utf8_lossy(data),
            }),
            Frame::Stdout { data } => json!({
                "op": Op::Stdout.as_str(),
                "data": String::from_utf8_lossy(data),
            }),
            Frame::Resize { rows, cols } => json!({
                "op": Op::Resize.as_str(),
                "cols": cols,
                "rows": rows,
            }),
        };
        value.to_string()
    }
}

fn require_data(data: Option<String>, op: Op) -> Result<Vec<u8>> {
    data.map(String::into_bytes)
        .ok_or_else(|| DecodeError::Malformed(format!("{op} frame is missing `data`")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_stdin() {
        let codec = FrameCodec::new();
        let frame = codec.decode(br#"{"op":"stdin","data":"ls -la\r"}"#).unwrap();
        assert_eq!(frame, Frame::stdin("ls -la\r"));
    }

    #[test]
    fn test_decode_stdin_empty_data() {
        let codec = FrameCodec::new();
        let frame = codec.decode(br#"{"op":"stdin","data":""}"#).unwrap();
        assert_eq!(frame, Frame::stdin(Vec::new()));
    }

    #[test]
    fn test_decode_stdin_missing_data() {
        let codec = FrameCodec::new();
        let err = codec.decode(br#"{"op":"stdin"}"#).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
    }

    #[test]
    fn test_decode_stdin_null_data() {
        let codec = FrameCodec::new();
        let err = codec.decode(br#"{"op":"stdin","data":null}"#).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
    }

    #[test]
    fn test_decode_resize() {
        let codec = FrameCodec::new();
        let frame = codec
            .decode(br#"{"op":"resize","cols":120,"rows":40}"#)
            .unwrap();
        assert_eq!(frame, Frame::Resize { rows: 40, cols: 120 });
    }

    #[test]
    fn test_decode_resize_ignores_data_field() {
        let codec = FrameCodec::new();
        let frame = codec
            .decode(br#"{"op":"resize","data":"","cols":80,"rows":24}"#)
            .unwrap();
        assert_eq!(frame, Frame::Resize { rows: 24, cols: 80 });
    }

    #[test]
    fn test_decode_resize_zero_rows() {
        let codec = FrameCodec::new();
        let err = codec
            .decode(br#"{"op":"resize","cols":80,"rows":0}"#)
            .unwrap_err();
        assert_eq!(err, DecodeError::InvalidDimensions { rows: 0, cols: 80 });
    }

    #[test]
    fn test_decode_resize_negative_cols() {
        let codec = FrameCodec::new();
        let err = codec
            .decode(br#"{"op":"resize","cols":-1,"rows":24}"#)
            .unwrap_err();
        assert_eq!(err, DecodeError::InvalidDimensions { rows: 24, cols: -1 });
    }

    #[test]
    fn test_decode_resize_missing_rows() {
        // An undefined `rows` in a browser client serializes to a missing field.
        let codec = FrameCodec::new();
        let err = codec.decode(br#"{"op":"resize","cols":80}"#).unwrap_err();
        assert_eq!(err, DecodeError::InvalidDimensions { rows: 0, cols: 80 });
    }

    #[test]
    fn test_decode_resize_too_large() {
        let codec = FrameCodec::new();
        let err = codec
            .decode(br#"{"op":"resize","cols":80,"rows":70000}"#)
            .unwrap_err();
        assert!(matches!(err, DecodeError::InvalidDimensions { .. }));
    }

    #[test]
    fn test_decode_resize_fractional() {
        let codec = FrameCodec::new();
        let err = codec
            .decode(br#"{"op":"resize","cols":80.5,"rows":24}"#)
            .unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
    }

    #[test]
    fn test_decode_unknown_op() {
        let codec = FrameCodec::new();
        let err = codec.decode(br#"{"op":"ping"}"#).unwrap_err();
        assert_eq!(err, DecodeError::UnknownOp("ping".to_string()));
    }

    #[test]
    fn test_decode_missing_op() {
        let codec = FrameCodec::new();
        let err = codec.decode(br#"{"data":"x"}"#).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
    }

    #[test]
    fn test_decode_not_json() {
        let codec = FrameCodec::new();
        let err = codec.decode(b"hello world").unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
    }

    #[test]
    fn test_decode_array_rejected() {
        let codec = FrameCodec::new();
        let err = codec.decode(br#"["stdin","x",1,1]"#).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
    }

    #[test]
    fn test_decode_too_large() {
        let codec = FrameCodec::with_max_frame_size(16);
        let err = codec
            .decode(br#"{"op":"stdin","data":"0123456789abcdef"}"#)
            .unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(msg) if msg.contains("too large")));
    }

    #[test]
    fn test_decode_ignores_unknown_fields() {
        let codec = FrameCodec::new();
        let frame = codec
            .decode(br#"{"op":"stdin","data":"a","session":"x"}"#)
            .unwrap();
        assert_eq!(frame, Frame::stdin("a"));
    }

    #[test]
    fn test_encode_stdout() {
        let codec = FrameCodec::new();
        let text = codec.encode(&Frame::stdout("hi\r\n"));
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["op"], "stdout");
        assert_eq!(value["data"], "hi\r\n");
    }

    #[test]
    fn test_encode_resize() {
        let codec = FrameCodec::new();
        let text = codec.encode(&Frame::Resize { rows: 24, cols: 80 });
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["op"], "resize");
        assert_eq!(value["rows"], 24);
        assert_eq!(value["cols"], 80);
    }

    #[test]
    fn test_stdout_control_sequences_survive() {
        // Colour codes, bell, backspace, NUL and a multibyte character.
        let payload = "\u{1b}[1;32mok\u{1b}[0m\u{7}\u{8}\0 \u{2603}\r\n".as_bytes().to_vec();
        let codec = FrameCodec::new();
        let text = codec.encode(&Frame::stdout(payload.clone()));
        assert_eq!(codec.decode(text.as_bytes()).unwrap(), Frame::stdout(payload));
    }

    #[test]
    fn test_encode_replaces_invalid_utf8() {
        let codec = FrameCodec::new();
        let text = codec.encode(&Frame::stdout(vec![b'a', 0xff, b'b']));
        let frame = codec.decode(text.as_bytes()).unwrap();
        assert_eq!(frame, Frame::stdout("a\u{fffd}b"));
    }
}

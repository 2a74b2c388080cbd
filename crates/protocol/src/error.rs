//! Error types for the protocol crate.

use thiserror::Error;

/// Errors produced while decoding an inbound frame.
///
/// All variants are recoverable: the offending frame is dropped and the
/// connection stays open.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The payload is not a well-formed frame object.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// The `op` tag names an operation this protocol does not define.
    #[error("unknown frame operation: {0:?}")]
    UnknownOp(String),

    /// A resize frame carried a dimension outside `1..=65535`.
    #[error("invalid terminal dimensions: {rows} rows x {cols} cols")]
    InvalidDimensions {
        /// Requested row count.
        rows: i64,
        /// Requested column count.
        cols: i64,
    },
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, DecodeError>;

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        DecodeError::Malformed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DecodeError::UnknownOp("ping".to_string());
        assert_eq!(err.to_string(), "unknown frame operation: \"ping\"");

        let err = DecodeError::InvalidDimensions { rows: 0, cols: 80 };
        assert_eq!(
            err.to_string(),
            "invalid terminal dimensions: 0 rows x 80 cols"
        );
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: DecodeError = json_err.into();
        assert!(matches!(err, DecodeError::Malformed(_)));
    }
}

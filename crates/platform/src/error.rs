//! Error types shared by Oakley crates

use std::fmt;

/// Unified error type surfaced across crate boundaries
#[derive(Debug)]
pub enum OakleyError {
    /// I/O error
    Io(std::io::Error),

    /// Configuration error
    Config(String),

    /// Protocol error (malformed message, failed negotiation, ...)
    Protocol(String),

    /// Security error (authentication, certificate validation, ...)
    Security(String),

    /// Datagram could not be handed to the transport
    Transport(String),
}

impl fmt::Display for OakleyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OakleyError::Io(e) => write!(f, "IO error: {}", e),
            OakleyError::Config(msg) => write!(f, "Configuration error: {}", msg),
            OakleyError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            OakleyError::Security(msg) => write!(f, "Security error: {}", msg),
            OakleyError::Transport(msg) => write!(f, "Transport error: {}", msg),
        }
    }
}

impl std::error::Error for OakleyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            OakleyError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for OakleyError {
    fn from(err: std::io::Error) -> Self {
        OakleyError::Io(err)
    }
}

/// Result type for cross-crate operations
pub type OakleyResult<T> = Result<T, OakleyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = OakleyError::Transport("socket closed".to_string());
        assert_eq!(err.to_string(), "Transport error: socket closed");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: OakleyError = io_err.into();
        assert!(matches!(err, OakleyError::Io(_)));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_result_type() {
        fn example() -> OakleyResult<i32> {
            Ok(42)
        }

        assert_eq!(example().unwrap(), 42);
    }
}

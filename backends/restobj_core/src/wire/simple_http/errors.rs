use derive_more::From;
use std::io;

/// Failures below the HTTP semantics layer: sockets, TLS and framing.
///
/// Kept `Clone` so a failure latched into a request slot can be handed to
/// every waiter, which is why I/O errors are stored as kind plus message.
#[derive(From, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Could not open a socket to the target.
    #[from(ignore)]
    ConnectFailed { target: String, reason: String },

    /// Empty or unparsable status line, typically a keep-alive socket the
    /// server already closed. Retried transparently.
    #[from(ignore)]
    BadStatusLine(String),

    /// A reused socket failed while writing or before any response byte.
    /// Retried transparently like a bad status line.
    #[from(ignore)]
    StaleConnection(String),

    /// Headers or body framing did not follow HTTP/1.1.
    #[from(ignore)]
    MalformedResponse(String),

    /// Only `http` and `https` are supported.
    #[from(ignore)]
    InvalidScheme(String),

    /// `https` requested without TLS support compiled in.
    #[from(ignore)]
    TlsUnavailable(String),

    #[from(ignore)]
    TlsHandshakeFailed(String),

    /// Reading the request body stream failed.
    #[from(ignore)]
    BodyRead(String),

    #[from(ignore)]
    IoError { kind: io::ErrorKind, message: String },

    /// The request consumed its retry budget; carries the last failure.
    #[from(ignore)]
    RetriesExhausted(Box<TransportError>),
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        TransportError::IoError {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl TransportError {
    /// Failures that a fresh connection may not repeat.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::BadStatusLine(_) | Self::StaleConnection(_))
    }
}

impl std::error::Error for TransportError {}

impl core::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectFailed { target, reason } => {
                write!(f, "Connection to {target} failed: {reason}")
            }
            Self::BadStatusLine(line) => write!(f, "Bad status line: {line:?}"),
            Self::StaleConnection(msg) => write!(f, "Reused connection failed: {msg}"),
            Self::MalformedResponse(msg) => write!(f, "Malformed response: {msg}"),
            Self::InvalidScheme(scheme) => write!(
                f,
                "Invalid URL scheme: {scheme} (only HTTP and HTTPS are supported)"
            ),
            Self::TlsUnavailable(target) => write!(
                f,
                "TLS requested for {target} but the ssl feature is not enabled"
            ),
            Self::TlsHandshakeFailed(msg) => write!(f, "TLS handshake failed: {msg}"),
            Self::BodyRead(msg) => write!(f, "Failed to read request body: {msg}"),
            Self::IoError { kind, message } => write!(f, "I/O error ({kind:?}): {message}"),
            Self::RetriesExhausted(last) => write!(f, "Retries exhausted, last error: {last}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// WHY: Only stale-socket failures may be retried by workers
    /// WHAT: Bad status lines and stale connections are transient, the rest are not
    #[test]
    fn test_transient_classification() {
        assert!(TransportError::BadStatusLine(String::new()).is_transient());
        assert!(TransportError::StaleConnection("reset".into()).is_transient());
        assert!(!TransportError::MalformedResponse("x".into()).is_transient());
        assert!(!TransportError::from(io::Error::new(io::ErrorKind::Other, "x")).is_transient());
    }

    #[test]
    fn test_io_error_conversion_keeps_kind() {
        let err = TransportError::from(io::Error::new(io::ErrorKind::TimedOut, "slow"));
        assert!(matches!(
            err,
            TransportError::IoError {
                kind: io::ErrorKind::TimedOut,
                ..
            }
        ));
        assert!(err.to_string().contains("slow"));
    }
}

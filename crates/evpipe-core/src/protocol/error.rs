// Evpipe Protocol Errors

use std::io;

/// Result type for protocol operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while framing or parsing the line protocol.
///
/// Every variant is fatal for the session: the stream must be restarted
/// end-to-end by the outer transport.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Invalid protocol version. Got {got:?}, expected {expected:?}")]
    VersionMismatch { expected: String, got: String },

    #[error("Malformed device descriptor: {0}")]
    MalformedDescriptor(String),

    #[error("Malformed event line: {0}")]
    MalformedEvent(String),

    #[error("Stream ended while waiting for {0}")]
    UnexpectedEof(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

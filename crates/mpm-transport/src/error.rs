//! Transport errors.

/// Errors produced by the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The peer closed the connection.
    #[error("connection closed by peer")]
    Closed,

    /// A frame header could not be understood; the stream is out of sync.
    #[error("bad frame: {0}")]
    BadFrame(&'static str),

    /// A TLS session is already active.
    #[error("TLS already started")]
    AlreadyStarted,

    /// The TLS handshake did not complete.
    #[error("TLS handshake failed: {0}")]
    TlsHandshakeFailed(&'static str),

    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TransportError>;

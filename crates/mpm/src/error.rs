//! Session-layer errors.

/// Errors surfaced by the session runtime.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No correlated response arrived within the command timeout.
    #[error("request timed out")]
    Timeout,

    /// The connection failed or was lost; outstanding waits complete with
    /// this error.
    #[error("communication failure")]
    CommFailure,

    #[error("session is not connected")]
    NotConnected,

    #[error("session is already connected")]
    AlreadyConnected,

    #[error(transparent)]
    Message(#[from] mpm_msg::MsgError),

    #[error(transparent)]
    Transport(#[from] mpm_transport::TransportError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

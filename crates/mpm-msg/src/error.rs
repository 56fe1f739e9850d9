//! Message codec errors.

/// Errors produced while assembling or parsing MPM messages.
#[derive(Debug, thiserror::Error)]
pub enum MsgError {
    /// A frame violated one of the structural validation rules.
    #[error("invalid message format: {0}")]
    InvalidFormat(&'static str),

    /// The field region could not be deflated or inflated, or the inflated
    /// size did not match the declared uncompressed size.
    #[error("payload compression failure: {0}")]
    Compression(&'static str),

    /// A field record carried a type tag outside the known set.
    #[error("unknown field type tag {0}")]
    UnknownFieldType(u8),

    /// The encoded protocol version cannot be handled.
    #[error("protocol version mismatch (encoded version {0})")]
    VersionMismatch(u8),

    #[error(transparent)]
    Dtyp(#[from] mpm_dtyp::DtypError),
}

pub type Result<T> = std::result::Result<T, MsgError>;

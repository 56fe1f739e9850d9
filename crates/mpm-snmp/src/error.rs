//! SNMP error kinds.

/// Errors produced by the SNMP codec, transport and MIB tree.
#[derive(Debug, thiserror::Error)]
pub enum SnmpError {
    /// No correlated response within the timeout/retry budget.
    #[error("request timed out")]
    Timeout,

    /// The socket failed to send or receive.
    #[error("communication failure")]
    CommFailure,

    /// A BER structure or PDU could not be decoded.
    #[error("parse error: {0}")]
    Parse(&'static str),

    /// Invalid arguments to a request (null PDU, zero retries, bad OID
    /// text).
    #[error("parameter error: {0}")]
    Parameter(&'static str),

    /// The caller-supplied encode buffer cannot hold the result.
    #[error("buffer too small")]
    BufferTooSmall,

    /// A MIB file does not start with the expected magic.
    #[error("bad MIB file magic")]
    BadMagic,

    /// A MIB file header or tag structure is malformed.
    #[error("bad MIB file data: {0}")]
    BadHeader(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Dtyp(#[from] mpm_dtyp::DtypError),
}

pub type Result<T> = std::result::Result<T, SnmpError>;

//! Common data types and encoding primitives shared by the `mpm` crates:
//! a position-tracked byte stream with explicit-endian accessors, codepage
//! aware string encoding, network address representation and checksum
//! helpers.

#![forbid(unsafe_code)]

pub mod bytestream;
pub mod codepage;
pub mod hash;
pub mod inet;

pub use bytestream::{ByteStream, SeekOrigin};
pub use codepage::{Codepage, UnitOrder};
pub use inet::{AddressFamily, InetAddress};

/// Errors produced by the encoding primitives.
#[derive(Debug, thiserror::Error)]
pub enum DtypError {
    /// Malformed or truncated data: reading past the end of a stream, a
    /// length prefix exceeding the remaining bytes, or string data that is
    /// not valid in its declared codepage.
    #[error("data format error: {0}")]
    Format(&'static str),
}

pub type Result<T> = std::result::Result<T, DtypError>;

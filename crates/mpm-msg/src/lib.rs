//! MPM wire messages.
//!
//! The Management Protocol Message is a framed, length-delimited binary
//! format: a fixed 16-byte header followed by typed field records (or an
//! opaque payload in binary mode). This crate covers assembly, typed field
//! access, serialization with optional deflate compression, and parsing.

#![forbid(unsafe_code)]

pub mod error;
pub mod field;
pub mod header;
pub mod message;

pub use error::MsgError;
pub use field::{Field, FieldType, FieldValue, FIELD_FLAG_SIGNED};
pub use header::{
    ALIGNMENT, HEADER_SIZE, MessageFlags, MessageHeader, PROTOCOL_VERSION,
};
pub use message::Message;

pub type Result<T> = std::result::Result<T, MsgError>;

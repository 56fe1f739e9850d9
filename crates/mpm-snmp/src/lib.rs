//! SNMP v1/v2c support: BER codec, PDU assembly/parsing, UDP transport
//! with retries, and the compiled MIB tree format.

#![forbid(unsafe_code)]

pub mod ber;
pub mod error;
pub mod mib;
pub mod oid;
pub mod pdu;
pub mod security;
pub mod transport;

pub use error::SnmpError;
pub use mib::{MibNodeId, MibObject, MibTree};
pub use oid::Oid;
pub use pdu::{SnmpCommand, SnmpPdu, SnmpValue, SnmpVariable, SnmpVersion};
pub use security::SnmpSecurityContext;
pub use transport::{SNMP_DEFAULT_PORT, SnmpUdpTransport};

pub type Result<T> = std::result::Result<T, SnmpError>;

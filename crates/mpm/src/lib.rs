//! Network-management protocol runtime.
//!
//! This crate ties the protocol stack together: the [`Session`] layer with
//! its background receive thread and request/response correlation, the
//! TTL-aged [`MsgWaitQueue`], and the self-tuning [`ThreadPool`] that
//! drives asynchronous dispatch. The wire codec lives in `mpm-msg`, the
//! transports in `mpm-transport`, and the SNMP stack in `mpm-snmp`.

#![forbid(unsafe_code)]

pub mod codes;
pub mod error;
pub mod session;
pub mod threadpool;
pub mod waitqueue;

pub use error::Error;
pub use session::{
    Session, SessionConfig, SessionEvent, SessionEventHandler, SessionState, SyncResult,
};
pub use threadpool::{ThreadPool, ThreadPoolInfo, ThreadPoolOptions};
pub use waitqueue::MsgWaitQueue;

pub use mpm_dtyp::*;
pub use mpm_msg::*;
pub use mpm_snmp as snmp;
pub use mpm_transport as transport;

/// Session-layer result type.
pub type Result<T> = std::result::Result<T, crate::Error>;

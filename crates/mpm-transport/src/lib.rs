//! Transport implementations for the MPM protocol stack: TCP connection
//! and frame reassembly, local named-pipe IPC, and a blocking TLS wrapper.

pub mod error;
pub mod tcp;
pub mod tls;

#[cfg(unix)]
pub mod pipe;

pub use error::TransportError;
pub use tcp::{DEFAULT_RECV_BUFFER_SIZE, Frame, FrameReceiver, TcpTransport};
pub use tls::TlsConnection;

#[cfg(unix)]
pub use pipe::{NamedPipe, NamedPipeListener, PipeRequestHandler};

pub type Result<T> = std::result::Result<T, TransportError>;

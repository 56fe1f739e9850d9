//! Blocking TLS over a plain TCP socket.
//!
//! The TLS state machine runs over a socket with read/write timeouts; I/O
//! loops retry until either bytes move or a non-retryable error appears.
//! `start_tls` is idempotent and may be called after a plain `connect`,
//! which is how STARTTLS-style upgrades work.

use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection};
use rustls_platform_verifier::BuilderVerifierExt;

use crate::error::{Result, TransportError};

/// A TCP connection with optional TLS on top.
pub struct TlsConnection {
    socket: TcpStream,
    peer: SocketAddr,
    tls: Option<ClientConnection>,
    default_timeout: Duration,
}

impl TlsConnection {
    /// Connects to the peer, optionally starting TLS at once.
    pub fn connect(
        peer: impl ToSocketAddrs,
        tls: bool,
        timeout: Duration,
        sni_server_name: Option<&str>,
    ) -> Result<TlsConnection> {
        let addr = peer
            .to_socket_addrs()?
            .next()
            .ok_or(TransportError::BadFrame("peer address does not resolve"))?;
        let socket = TcpStream::connect_timeout(&addr, timeout)?;
        socket.set_nodelay(true)?;

        let mut conn = TlsConnection {
            socket,
            peer: addr,
            tls: None,
            default_timeout: timeout,
        };
        if tls {
            conn.start_tls(None, sni_server_name)?;
        }
        Ok(conn)
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    /// Starts a TLS session on the established connection. Returns
    /// [`TransportError::AlreadyStarted`] when TLS is already active.
    pub fn start_tls(
        &mut self,
        timeout: Option<Duration>,
        sni_server_name: Option<&str>,
    ) -> Result<()> {
        if self.tls.is_some() {
            return Err(TransportError::AlreadyStarted);
        }
        let timeout = timeout.unwrap_or(self.default_timeout);

        let config = ClientConfig::builder()
            .with_platform_verifier()
            .map_err(|_| TransportError::TlsHandshakeFailed("no certificate verifier"))?
            .with_no_client_auth();

        let server_name: ServerName<'static> = match sni_server_name {
            Some(name) => {
                log::debug!("using SNI server name {name:?}");
                ServerName::try_from(name.to_owned())
                    .map_err(|_| TransportError::TlsHandshakeFailed("invalid SNI name"))?
            }
            None => ServerName::IpAddress(self.peer.ip().into()),
        };

        let mut conn = ClientConnection::new(Arc::new(config), server_name)?;

        self.socket.set_read_timeout(Some(timeout))?;
        self.socket.set_write_timeout(Some(timeout))?;
        while conn.is_handshaking() {
            match conn.complete_io(&mut self.socket) {
                Ok(_) => {}
                Err(e)
                    if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut =>
                {
                    log::debug!("TLS handshake timed out");
                    return Err(TransportError::TlsHandshakeFailed("handshake timeout"));
                }
                Err(e) => {
                    log::debug!("TLS handshake failed: {e}");
                    return Err(TransportError::TlsHandshakeFailed("handshake I/O failure"));
                }
            }
        }
        log::debug!("TLS handshake completed with {}", self.peer);

        self.tls = Some(conn);
        Ok(())
    }

    /// Drops the TLS state, keeping the underlying socket open.
    pub fn stop_tls(&mut self) {
        self.tls = None;
    }

    fn set_timeout(&self, timeout: Duration) -> Result<()> {
        self.socket.set_read_timeout(Some(timeout))?;
        self.socket.set_write_timeout(Some(timeout))?;
        Ok(())
    }

    /// Receives plaintext, driving the TLS record layer as needed. Returns
    /// 0 at end of stream. A TLS protocol error tears the TLS state down.
    pub fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        self.set_timeout(timeout)?;
        let Some(conn) = self.tls.as_mut() else {
            return Ok(self.socket.read(buf)?);
        };

        let error = loop {
            match conn.reader().read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    // No buffered plaintext; pump the record layer.
                    if conn.wants_write() {
                        conn.write_tls(&mut self.socket)?;
                    }
                    let n = conn.read_tls(&mut self.socket)?;
                    if n == 0 {
                        return Ok(0);
                    }
                    match conn.process_new_packets() {
                        Ok(_) => {}
                        Err(e) => break e,
                    }
                }
                Err(e) => return Err(e.into()),
            }
        };

        // Protocol error: tear down the TLS state, keep the socket.
        self.tls = None;
        Err(error.into())
    }

    /// Sends plaintext, flushing the produced TLS records to the socket.
    pub fn send(&mut self, buf: &[u8], timeout: Duration) -> Result<usize> {
        self.set_timeout(timeout)?;
        let Some(conn) = self.tls.as_mut() else {
            return Ok(self.socket.write(buf)?);
        };

        let written = conn.writer().write(buf)?;
        while conn.wants_write() {
            conn.write_tls(&mut self.socket)?;
        }
        Ok(written)
    }
}

//! UDP transport with a retry/timeout request loop.
//!
//! The socket is pseudo-connected (`connect()` applied to a datagram
//! socket) so `send`/`recv` bind to a single peer. Received data goes
//! through a cursor-managed buffer; the outer SEQUENCE is pre-parsed to
//! honor datagram boundaries before the full PDU parse runs.

use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use rand::Rng;

use crate::ber::{self, ASN_SEQUENCE};
use crate::error::{Result, SnmpError};
use crate::pdu::SnmpPdu;

/// Default receive buffer size.
const DEFAULT_BUFFER_SIZE: usize = 32768;

/// Default SNMP agent port.
pub const SNMP_DEFAULT_PORT: u16 = 161;

/// A pseudo-connected UDP SNMP transport.
pub struct SnmpUdpTransport {
    socket: UdpSocket,
    buffer: Vec<u8>,
    buffer_pos: usize,
    bytes_in_buffer: usize,
    next_request_id: u32,
}

impl SnmpUdpTransport {
    /// Creates a transport connected to the given peer. Host names are
    /// resolved; the first resolved address is used.
    pub fn connect(peer: impl ToSocketAddrs) -> Result<SnmpUdpTransport> {
        let addr = peer
            .to_socket_addrs()?
            .next()
            .ok_or(SnmpError::Parameter("peer address does not resolve"))?;
        let bind_addr: SocketAddr = if addr.is_ipv4() {
            "0.0.0.0:0".parse().unwrap()
        } else {
            "[::]:0".parse().unwrap()
        };
        let socket = UdpSocket::bind(bind_addr)?;
        socket.connect(addr)?;
        Ok(SnmpUdpTransport::from_socket(socket))
    }

    /// Wraps an already connected socket.
    pub fn from_socket(socket: UdpSocket) -> SnmpUdpTransport {
        SnmpUdpTransport {
            socket,
            buffer: vec![0; DEFAULT_BUFFER_SIZE],
            buffer_pos: 0,
            bytes_in_buffer: 0,
            next_request_id: rand::thread_rng().r#gen(),
        }
    }

    /// Allocates the next request id.
    pub fn next_request_id(&mut self) -> u32 {
        self.next_request_id = self.next_request_id.wrapping_add(1);
        self.next_request_id
    }

    /// Encodes and sends one PDU.
    pub fn send(&self, pdu: &SnmpPdu) -> Result<()> {
        let datagram = pdu.encode()?;
        let sent = self.socket.send(&datagram).map_err(|e| {
            log::debug!("SNMP send failed: {e}");
            SnmpError::CommFailure
        })?;
        if sent != datagram.len() {
            return Err(SnmpError::CommFailure);
        }
        Ok(())
    }

    fn clear_buffer(&mut self) {
        self.buffer_pos = 0;
        self.bytes_in_buffer = 0;
    }

    fn recv_data(&mut self, timeout: Duration) -> Result<usize> {
        self.socket
            .set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;
        let start = self.buffer_pos + self.bytes_in_buffer;
        match self.socket.recv(&mut self.buffer[start..]) {
            Ok(n) => Ok(n),
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                Err(SnmpError::Timeout)
            }
            Err(e) => {
                log::debug!("SNMP recv failed: {e}");
                Err(SnmpError::CommFailure)
            }
        }
    }

    /// Total length of the PDU at the buffer cursor, or `None` when the
    /// data does not start with a readable SEQUENCE.
    fn pre_parse_pdu(&self) -> Option<usize> {
        let window =
            &self.buffer[self.buffer_pos..self.buffer_pos + self.bytes_in_buffer];
        match ber::decode_identifier(window) {
            Ok((ASN_SEQUENCE, length, header_len)) => Some(length + header_len),
            _ => None,
        }
    }

    /// Reads one PDU, waiting up to `timeout` for each datagram.
    pub fn read(&mut self, timeout: Duration) -> Result<SnmpPdu> {
        if self.bytes_in_buffer < 2 {
            match self.recv_data(timeout) {
                Ok(n) => self.bytes_in_buffer += n,
                Err(e) => {
                    self.clear_buffer();
                    return Err(e);
                }
            }
        }

        let pdu_length = match self.pre_parse_pdu() {
            Some(len) if len <= self.buffer.len() => len,
            _ => {
                // Garbage or oversized data; drop it and report nothing
                // received.
                self.clear_buffer();
                return Err(SnmpError::Timeout);
            }
        };

        // Compact when the tail of the buffer cannot hold the full PDU.
        if pdu_length > self.buffer.len() - self.buffer_pos {
            self.buffer
                .copy_within(self.buffer_pos..self.buffer_pos + self.bytes_in_buffer, 0);
            self.buffer_pos = 0;
        }

        while self.bytes_in_buffer < pdu_length {
            match self.recv_data(timeout) {
                Ok(n) => self.bytes_in_buffer += n,
                Err(e) => {
                    self.clear_buffer();
                    return Err(e);
                }
            }
        }

        let result = SnmpPdu::parse(
            &self.buffer[self.buffer_pos..self.buffer_pos + pdu_length],
        );
        self.bytes_in_buffer -= pdu_length;
        self.buffer_pos = if self.bytes_in_buffer > 0 {
            self.buffer_pos + pdu_length
        } else {
            0
        };
        result
    }

    /// Sends `request` and waits for the correlated response, retrying up
    /// to `retries` times with `timeout` per attempt. A response with a
    /// different request id counts as a timed-out attempt (stale reply).
    pub fn do_request(
        &mut self,
        request: &SnmpPdu,
        timeout: Duration,
        retries: u32,
    ) -> Result<SnmpPdu> {
        if retries == 0 {
            return Err(SnmpError::Parameter("retry count must not be zero"));
        }

        let mut result = SnmpError::Timeout;
        for _ in 0..retries {
            if let Err(e) = self.send(request) {
                return Err(e);
            }

            match self.read(timeout) {
                Ok(response) if response.request_id == request.request_id => {
                    return Ok(response);
                }
                Ok(_) => result = SnmpError::Timeout,
                Err(SnmpError::Timeout) => result = SnmpError::Timeout,
                Err(e @ SnmpError::Parse(_)) => return Err(e),
                Err(_) => result = SnmpError::CommFailure,
            }
        }
        Err(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oid::Oid;
    use crate::pdu::{SnmpCommand, SnmpVariable, SnmpVersion};
    use std::time::Instant;

    fn make_request(id: u32) -> SnmpPdu {
        let mut pdu = SnmpPdu::new(SnmpVersion::V2c, SnmpCommand::GetRequest, "public", id);
        pdu.bind(SnmpVariable::null("1.3.6.1.2.1.1.1.0".parse::<Oid>().unwrap()));
        pdu
    }

    fn silent_peer() -> (UdpSocket, SocketAddr) {
        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = peer.local_addr().unwrap();
        (peer, addr)
    }

    #[test]
    fn zero_retries_is_a_parameter_error() {
        let (_peer, addr) = silent_peer();
        let mut transport = SnmpUdpTransport::connect(addr).unwrap();
        let request = make_request(1);
        assert!(matches!(
            transport.do_request(&request, Duration::from_millis(100), 0),
            Err(SnmpError::Parameter(_))
        ));
    }

    #[test]
    fn retry_exhaustion_sends_every_attempt() {
        let (peer, addr) = silent_peer();
        let mut transport = SnmpUdpTransport::connect(addr).unwrap();
        let request = make_request(0x42);

        let start = Instant::now();
        let result = transport.do_request(&request, Duration::from_millis(100), 3);
        assert!(matches!(result, Err(SnmpError::Timeout)));
        assert!(start.elapsed() >= Duration::from_millis(250));

        // The peer saw one identical datagram per attempt.
        peer.set_read_timeout(Some(Duration::from_millis(200))).unwrap();
        let expected = request.encode().unwrap();
        let mut datagrams = 0;
        let mut buf = [0u8; 2048];
        while let Ok(n) = peer.recv(&mut buf) {
            assert_eq!(&buf[..n], &expected[..]);
            datagrams += 1;
        }
        assert_eq!(datagrams, 3);
    }

    #[test]
    fn stale_reply_is_retried_until_the_correlated_one() {
        let (peer, addr) = silent_peer();
        let mut transport = SnmpUdpTransport::connect(addr).unwrap();
        let request = make_request(7);

        let responder = std::thread::spawn(move || {
            let mut buf = [0u8; 2048];
            peer.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
            let (n, from) = peer.recv_from(&mut buf).unwrap();
            let incoming = SnmpPdu::parse(&buf[..n]).unwrap();

            // First a stale response, then the correlated one.
            let mut stale = incoming.clone();
            stale.command = SnmpCommand::GetResponse;
            stale.request_id = incoming.request_id.wrapping_add(9);
            peer.send_to(&stale.encode().unwrap(), from).unwrap();

            let (n, from) = peer.recv_from(&mut buf).unwrap();
            let incoming = SnmpPdu::parse(&buf[..n]).unwrap();
            let mut reply = incoming.clone();
            reply.command = SnmpCommand::GetResponse;
            peer.send_to(&reply.encode().unwrap(), from).unwrap();
        });

        let response = transport
            .do_request(&request, Duration::from_millis(500), 3)
            .unwrap();
        assert_eq!(response.request_id, 7);
        assert_eq!(response.command, SnmpCommand::GetResponse);
        responder.join().unwrap();
    }

    #[test]
    fn request_ids_are_unique() {
        let (_peer, addr) = silent_peer();
        let mut transport = SnmpUdpTransport::connect(addr).unwrap();
        let first = transport.next_request_id();
        let second = transport.next_request_id();
        assert_ne!(first, second);
    }
}

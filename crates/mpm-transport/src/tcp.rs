//! TCP transport: connection setup, serialized frame sends, and buffered
//! reassembly of length-delimited MPM frames.

use std::io::Read;
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Mutex;
use std::time::Duration;

use mpm_msg::{HEADER_SIZE, MessageHeader};

use crate::error::{Result, TransportError};

/// Default receive buffer capacity (also the frame size limit).
pub const DEFAULT_RECV_BUFFER_SIZE: usize = 4 * 1024 * 1024;

/// One reassembly result.
#[derive(Debug)]
pub enum Frame {
    /// A complete frame, exactly as declared by its header.
    Message(Vec<u8>),
    /// A frame whose declared size exceeds the receive buffer. The frame
    /// has been drained from the stream, so the next header follows
    /// immediately.
    Oversized { code: u16, declared_size: u32 },
}

/// Buffered reassembly of MPM frames from a byte stream.
pub struct FrameReceiver<R: Read> {
    reader: R,
    buffer: Vec<u8>,
    start: usize,
    len: usize,
}

impl<R: Read> FrameReceiver<R> {
    pub fn new(reader: R) -> FrameReceiver<R> {
        FrameReceiver::with_buffer_size(reader, DEFAULT_RECV_BUFFER_SIZE)
    }

    pub fn with_buffer_size(reader: R, buffer_size: usize) -> FrameReceiver<R> {
        FrameReceiver {
            reader,
            buffer: vec![0; buffer_size.max(HEADER_SIZE)],
            start: 0,
            len: 0,
        }
    }

    /// Pulls more data from the stream into the spare buffer space,
    /// compacting first when the tail is exhausted.
    fn fill(&mut self) -> Result<()> {
        if self.start + self.len == self.buffer.len() {
            self.buffer.copy_within(self.start..self.start + self.len, 0);
            self.start = 0;
        }
        let free = self.start + self.len..self.buffer.len();
        let n = self.reader.read(&mut self.buffer[free])?;
        if n == 0 {
            return Err(TransportError::Closed);
        }
        self.len += n;
        Ok(())
    }

    /// Reads and discards `count` bytes, starting with what is buffered.
    fn drain(&mut self, mut count: usize) -> Result<()> {
        let buffered = count.min(self.len);
        self.start += buffered;
        self.len -= buffered;
        count -= buffered;
        let mut scratch = [0u8; 4096];
        while count > 0 {
            let chunk = count.min(scratch.len());
            let n = self.reader.read(&mut scratch[..chunk])?;
            if n == 0 {
                return Err(TransportError::Closed);
            }
            count -= n;
        }
        Ok(())
    }

    /// Receives the next frame. Oversized frames are drained and reported
    /// so that the caller can log and continue in sync.
    pub fn receive(&mut self) -> Result<Frame> {
        while self.len < HEADER_SIZE {
            self.fill()?;
        }

        let header =
            MessageHeader::parse(&self.buffer[self.start..self.start + HEADER_SIZE])
                .map_err(|_| TransportError::BadFrame("unreadable header"))?;
        let declared = header.size as usize;
        if declared < HEADER_SIZE {
            return Err(TransportError::BadFrame("declared size smaller than header"));
        }

        if declared > self.buffer.len() {
            self.drain(declared)?;
            return Ok(Frame::Oversized {
                code: header.code,
                declared_size: header.size,
            });
        }

        // Compact when the frame cannot fit in the tail.
        if self.start + declared > self.buffer.len() {
            self.buffer.copy_within(self.start..self.start + self.len, 0);
            self.start = 0;
        }
        while self.len < declared {
            self.fill()?;
        }

        let frame = self.buffer[self.start..self.start + declared].to_vec();
        self.start += declared;
        self.len -= declared;
        if self.len == 0 {
            self.start = 0;
        }
        Ok(Frame::Message(frame))
    }
}

/// A connected TCP transport. Sends are serialized under a mutex and
/// written with one `write_all` call, so concurrent senders cannot
/// interleave frames.
pub struct TcpTransport {
    stream: TcpStream,
    send_lock: Mutex<()>,
}

impl TcpTransport {
    /// Connects with a timeout. Host names are resolved; the first
    /// resolved address is used.
    pub fn connect(peer: impl ToSocketAddrs, timeout: Duration) -> Result<TcpTransport> {
        let addr = peer
            .to_socket_addrs()?
            .next()
            .ok_or(TransportError::BadFrame("peer address does not resolve"))?;
        let stream = TcpStream::connect_timeout(&addr, timeout)?;
        stream.set_nodelay(true)?;
        Ok(TcpTransport {
            stream,
            send_lock: Mutex::new(()),
        })
    }

    pub fn from_stream(stream: TcpStream) -> TcpTransport {
        TcpTransport {
            stream,
            send_lock: Mutex::new(()),
        }
    }

    pub fn peer_addr(&self) -> Result<SocketAddr> {
        Ok(self.stream.peer_addr()?)
    }

    /// Sends one fully framed message; partial writes are retried by
    /// `write_all`.
    pub fn send_frame(&self, frame: &[u8]) -> Result<()> {
        use std::io::Write;
        let _guard = self.send_lock.lock().unwrap();
        (&self.stream).write_all(frame)?;
        Ok(())
    }

    /// A second handle on the socket for the receive side.
    pub fn reader_stream(&self) -> Result<TcpStream> {
        Ok(self.stream.try_clone()?)
    }

    /// Shuts the socket down in both directions, unblocking any reader.
    pub fn shutdown(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mpm_msg::Message;
    use std::io::Cursor;

    #[test]
    fn reassembles_consecutive_frames() {
        let mut msg1 = Message::new(0x0001, 1);
        msg1.set_u32(1, 11);
        let mut msg2 = Message::new(0x0002, 2);
        msg2.set_string(1, "second frame");

        let mut wire = msg1.serialize(false);
        wire.extend_from_slice(&msg2.serialize(false));

        let mut receiver = FrameReceiver::with_buffer_size(Cursor::new(wire), 1024);
        match receiver.receive().unwrap() {
            Frame::Message(frame) => {
                assert_eq!(Message::parse(&frame, 5).unwrap(), msg1)
            }
            other => panic!("unexpected {other:?}"),
        }
        match receiver.receive().unwrap() {
            Frame::Message(frame) => {
                assert_eq!(Message::parse(&frame, 5).unwrap(), msg2)
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(receiver.receive(), Err(TransportError::Closed)));
    }

    #[test]
    fn oversized_frame_resyncs() {
        let big = Message::new_binary(0x0077, 1, vec![0xAB; 4096]);
        let mut small = Message::new(0x0008, 2);
        small.set_u32(1, 5);

        let mut wire = big.serialize(false);
        wire.extend_from_slice(&small.serialize(false));

        // Buffer too small for the first frame, large enough for the
        // second.
        let mut receiver = FrameReceiver::with_buffer_size(Cursor::new(wire), 256);
        match receiver.receive().unwrap() {
            Frame::Oversized { code, declared_size } => {
                assert_eq!(code, 0x0077);
                assert_eq!(declared_size, 4096 + 16);
            }
            other => panic!("unexpected {other:?}"),
        }
        match receiver.receive().unwrap() {
            Frame::Message(frame) => {
                assert_eq!(Message::parse(&frame, 5).unwrap(), small)
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn trickled_bytes_still_frame() {
        // A reader that returns one byte at a time.
        struct Trickle(Cursor<Vec<u8>>);
        impl Read for Trickle {
            fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
                let chunk = 1.min(buf.len());
                self.0.read(&mut buf[..chunk])
            }
        }

        let mut msg = Message::new(0x0042, 9);
        msg.set_string(1, "byte by byte");
        let wire = msg.serialize(false);

        let mut receiver = FrameReceiver::with_buffer_size(Trickle(Cursor::new(wire)), 512);
        match receiver.receive().unwrap() {
            Frame::Message(frame) => assert_eq!(Message::parse(&frame, 5).unwrap(), msg),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn undersized_header_is_an_error() {
        let mut bad = vec![0u8; 16];
        bad[4..8].copy_from_slice(&4u32.to_be_bytes()); // size 4 < 16
        let mut receiver = FrameReceiver::with_buffer_size(Cursor::new(bad), 64);
        assert!(matches!(
            receiver.receive(),
            Err(TransportError::BadFrame(_))
        ));
    }
}

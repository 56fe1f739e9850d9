//! End-to-end session tests against an in-process TCP server speaking the
//! framed protocol.

use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use mpm::codes;
use mpm::transport::{Frame, FrameReceiver, TcpTransport};
use mpm::{Error, Message, Session, SessionConfig, SessionEvent};

const CMD_ECHO: u16 = 0x0100;
const CMD_IGNORED: u16 = 0x0101;
const CMD_SUBSCRIBE: u16 = 0x0102;
const FIELD_RCC: u32 = 1;
const FIELD_TEXT: u32 = 2;

/// Minimal server: echoes CMD_ECHO requests as CMD_REQUEST_COMPLETED,
/// ignores CMD_IGNORED, and answers CMD_SUBSCRIBE by pushing unsolicited
/// traffic before the completion message.
fn spawn_server() -> (std::net::SocketAddr, thread::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        serve_connection(stream);
    });
    (addr, handle)
}

fn serve_connection(stream: TcpStream) {
    let transport = TcpTransport::from_stream(stream.try_clone().unwrap());
    let mut receiver = FrameReceiver::with_buffer_size(stream, 64 * 1024);

    loop {
        let frame = match receiver.receive() {
            Ok(Frame::Message(frame)) => frame,
            Ok(Frame::Oversized { .. }) => continue,
            Err(_) => break,
        };
        let request = match Message::parse(&frame, 5) {
            Ok(msg) => msg,
            Err(_) => continue,
        };

        match request.code() {
            CMD_ECHO => {
                let mut response = Message::new(codes::CMD_REQUEST_COMPLETED, request.id());
                response.set_u32(FIELD_RCC, 0);
                if let Some(text) = request.get_string(FIELD_TEXT) {
                    response.set_string(FIELD_TEXT, &text);
                }
                transport.send_frame(&response.serialize(false)).unwrap();
            }
            CMD_SUBSCRIBE => {
                let keepalive = Message::new(codes::CMD_KEEPALIVE, 0);
                transport.send_frame(&keepalive.serialize(false)).unwrap();

                let mut update = Message::new(codes::CMD_OBJECT_UPDATE, 0);
                update.set_u32(FIELD_RCC, 4242);
                transport.send_frame(&update.serialize(false)).unwrap();

                let event =
                    Message::new_binary(codes::CMD_EVENT, 0, b"event payload".to_vec());
                transport.send_frame(&event.serialize(false)).unwrap();

                let mut response = Message::new(codes::CMD_REQUEST_COMPLETED, request.id());
                response.set_u32(FIELD_RCC, 0);
                transport.send_frame(&response.serialize(false)).unwrap();
            }
            CMD_IGNORED => {}
            _ => break,
        }
    }
}

#[test_log::test]
fn request_response_roundtrip() {
    let (addr, server) = spawn_server();
    let session = Session::connect(addr, SessionConfig::default()).unwrap();

    let mut request = Message::new(CMD_ECHO, 0);
    request.set_string(FIELD_TEXT, "ping over the wire");
    let response = session.request(&mut request).unwrap();

    assert_eq!(response.code(), codes::CMD_REQUEST_COMPLETED);
    assert_eq!(response.id(), request.id());
    assert_eq!(response.get_u32(FIELD_RCC), Some(0));
    assert_eq!(response.get_string(FIELD_TEXT).as_deref(), Some("ping over the wire"));

    session.disconnect();
    server.join().unwrap();
}

#[test_log::test]
fn concurrent_requests_correlate_by_id() {
    let (addr, server) = spawn_server();
    let session = Arc::new(Session::connect(addr, SessionConfig::default()).unwrap());

    let mut workers = Vec::new();
    for i in 0..8 {
        let session = session.clone();
        workers.push(thread::spawn(move || {
            let text = format!("request #{i}");
            let mut request = Message::new(CMD_ECHO, 0);
            request.set_string(FIELD_TEXT, &text);
            let response = session.request(&mut request).unwrap();
            assert_eq!(response.get_string(FIELD_TEXT).as_deref(), Some(text.as_str()));
        }));
    }
    for worker in workers {
        worker.join().unwrap();
    }

    session.disconnect();
    server.join().unwrap();
}

#[test_log::test]
fn async_codes_reach_the_event_handler() {
    let (addr, server) = spawn_server();
    let session = Session::connect(addr, SessionConfig::default()).unwrap();

    let (tx, rx) = mpsc::channel();
    session.set_event_handler(Arc::new(move |event: SessionEvent| {
        tx.send(event).unwrap();
    }));

    let mut subscribe = Message::new(CMD_SUBSCRIBE, 0);
    session.request(&mut subscribe).unwrap();

    let mut seen_update = false;
    let mut seen_event = false;
    for _ in 0..2 {
        match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
            SessionEvent::ObjectUpdate(msg) => {
                assert_eq!(msg.get_u32(FIELD_RCC), Some(4242));
                seen_update = true;
            }
            SessionEvent::Event(msg) => {
                assert!(msg.is_binary());
                assert_eq!(msg.data(), b"event payload");
                seen_event = true;
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert!(seen_update && seen_event);

    session.disconnect();
    server.join().unwrap();
}

#[test_log::test]
fn unanswered_request_times_out() {
    let (addr, server) = spawn_server();
    let config = SessionConfig {
        command_timeout: Duration::from_millis(300),
        ..Default::default()
    };
    let session = Session::connect(addr, config).unwrap();

    let mut request = Message::new(CMD_IGNORED, 0);
    request.set_u32(FIELD_RCC, 1);
    match session.request(&mut request) {
        Err(Error::Timeout) => {}
        other => panic!("expected timeout, got {other:?}"),
    }

    // The session survives a timed-out request.
    let mut request = Message::new(CMD_ECHO, 0);
    request.set_string(FIELD_TEXT, "still alive");
    assert!(session.request(&mut request).is_ok());

    session.disconnect();
    server.join().unwrap();
}

#[test_log::test]
fn server_disconnect_fails_outstanding_waits() {
    let (addr, server) = spawn_server();
    let session = Session::connect(addr, SessionConfig::default()).unwrap();

    // An unknown code makes the server close the connection.
    let mut request = Message::new(0x7FFF, 0);
    request.set_u32(FIELD_RCC, 1);
    match session.request(&mut request) {
        Err(Error::CommFailure) | Err(Error::Timeout) => {}
        other => panic!("expected a failed wait, got {other:?}"),
    }
    server.join().unwrap();

    // Further sends report the lost connection.
    thread::sleep(Duration::from_millis(100));
    let mut request = Message::new(CMD_ECHO, 0);
    let result = session.request(&mut request);
    assert!(result.is_err());
}

#[test_log::test]
fn request_ids_are_monotonic() {
    let (addr, server) = spawn_server();
    let session = Session::connect(addr, SessionConfig::default()).unwrap();

    let first = session.create_request_id();
    let second = session.create_request_id();
    assert!(second > first);

    session.disconnect();
    server.join().unwrap();
}

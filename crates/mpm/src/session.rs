//! Client session: one socket, one background receive thread, a message
//! wait queue and a request-id allocator.
//!
//! The receive thread decodes frames, hands known asynchronous codes to the
//! registered event handler, consumes keepalives, and parks everything else
//! in the wait queue where request-issuing calls pick up their correlated
//! responses.

use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use mpm_msg::{Message, PROTOCOL_VERSION};
use mpm_transport::{Frame, FrameReceiver, TcpTransport};

use crate::codes;
use crate::error::{Error, Result};
use crate::waitqueue::MsgWaitQueue;

/// Session tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Per-request wait budget.
    pub command_timeout: Duration,
    pub connect_timeout: Duration,
    /// Receive buffer capacity; frames larger than this are dropped.
    pub recv_buffer_size: usize,
    pub protocol_version: u8,
    /// Offer compressed frames when the protocol version allows it.
    pub allow_compression: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            command_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            recv_buffer_size: mpm_transport::DEFAULT_RECV_BUFFER_SIZE,
            protocol_version: PROTOCOL_VERSION,
            allow_compression: true,
        }
    }
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected,
    Idle,
    Syncing,
    TlsHandshake,
}

/// An asynchronous notification delivered by the receive thread.
#[derive(Debug)]
pub enum SessionEvent {
    ObjectRecord(Message),
    ObjectUpdate(Message),
    ObjectListEnd(Message),
    Event(Message),
    EventListEnd(Message),
    EventDbRecord(Message),
    SyslogRecord(Message),
    AlarmUpdate(Message),
    ActionUpdate(Message),
    Notify(Message),
    UserRecord(Message),
    GroupRecord(Message),
    UserDbEnd(Message),
    UserDbUpdate(Message),
    DciRecord(Message),
    DciListEnd(Message),
}

impl SessionEvent {
    /// The message carried by the event.
    pub fn message(&self) -> &Message {
        match self {
            SessionEvent::ObjectRecord(m)
            | SessionEvent::ObjectUpdate(m)
            | SessionEvent::ObjectListEnd(m)
            | SessionEvent::Event(m)
            | SessionEvent::EventListEnd(m)
            | SessionEvent::EventDbRecord(m)
            | SessionEvent::SyslogRecord(m)
            | SessionEvent::AlarmUpdate(m)
            | SessionEvent::ActionUpdate(m)
            | SessionEvent::Notify(m)
            | SessionEvent::UserRecord(m)
            | SessionEvent::GroupRecord(m)
            | SessionEvent::UserDbEnd(m)
            | SessionEvent::UserDbUpdate(m)
            | SessionEvent::DciRecord(m)
            | SessionEvent::DciListEnd(m) => m,
        }
    }
}

/// Handler receiving asynchronous session events.
pub type SessionEventHandler = dyn Fn(SessionEvent) + Send + Sync;

/// Outcome of a sync operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncResult {
    Success,
    CommFailure,
}

struct SyncState {
    active: bool,
    result: Option<SyncResult>,
}

/// Rendezvous for list-download style operations: the caller arms it,
/// the receive thread completes it.
struct SyncPoint {
    state: Mutex<SyncState>,
    completed: Condvar,
}

impl SyncPoint {
    fn new() -> SyncPoint {
        SyncPoint {
            state: Mutex::new(SyncState {
                active: false,
                result: None,
            }),
            completed: Condvar::new(),
        }
    }

    fn prepare(&self) {
        let mut state = self.state.lock().unwrap();
        state.active = true;
        state.result = None;
    }

    fn complete(&self, result: SyncResult) {
        let mut state = self.state.lock().unwrap();
        if !state.active {
            return;
        }
        state.active = false;
        state.result = Some(result);
        self.completed.notify_all();
    }

    fn wait(&self, timeout: Duration) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        while state.result.is_none() {
            if !state.active {
                return Err(Error::CommFailure);
            }
            let (s, wait_result) = self.completed.wait_timeout(state, timeout).unwrap();
            state = s;
            if wait_result.timed_out() && state.result.is_none() {
                state.active = false;
                return Err(Error::Timeout);
            }
        }
        match state.result.take().unwrap() {
            SyncResult::Success => Ok(()),
            SyncResult::CommFailure => Err(Error::CommFailure),
        }
    }
}

struct SessionShared {
    transport: TcpTransport,
    wait_queue: MsgWaitQueue,
    request_id: AtomicU32,
    state: Mutex<SessionState>,
    sync: SyncPoint,
    handler: Mutex<Option<Arc<SessionEventHandler>>>,
    protocol_version: u8,
    command_timeout: Duration,
    allow_compression: bool,
}

impl SessionShared {
    fn route_message(&self, msg: Message) {
        let event = match msg.code() {
            codes::CMD_KEEPALIVE => return,
            codes::CMD_OBJECT => SessionEvent::ObjectRecord(msg),
            codes::CMD_OBJECT_UPDATE => SessionEvent::ObjectUpdate(msg),
            codes::CMD_OBJECT_LIST_END => SessionEvent::ObjectListEnd(msg),
            codes::CMD_EVENT => SessionEvent::Event(msg),
            codes::CMD_EVENT_LIST_END => SessionEvent::EventListEnd(msg),
            codes::CMD_EVENT_DB_RECORD => SessionEvent::EventDbRecord(msg),
            codes::CMD_SYSLOG_RECORD => SessionEvent::SyslogRecord(msg),
            codes::CMD_ALARM_UPDATE => SessionEvent::AlarmUpdate(msg),
            codes::CMD_ACTION_DB_UPDATE => SessionEvent::ActionUpdate(msg),
            codes::CMD_NOTIFY => SessionEvent::Notify(msg),
            codes::CMD_USER_DATA => SessionEvent::UserRecord(msg),
            codes::CMD_GROUP_DATA => SessionEvent::GroupRecord(msg),
            codes::CMD_USER_DB_EOF => SessionEvent::UserDbEnd(msg),
            codes::CMD_USER_DB_UPDATE => SessionEvent::UserDbUpdate(msg),
            codes::CMD_NODE_DCI => SessionEvent::DciRecord(msg),
            codes::CMD_NODE_DCI_LIST_END => SessionEvent::DciListEnd(msg),
            _ => {
                self.wait_queue.put(msg);
                return;
            }
        };

        let handler = self.handler.lock().unwrap().clone();
        match handler {
            Some(handler) => handler(event),
            None => log::trace!(
                "no event handler registered, dropping async message 0x{:04X}",
                event.message().code()
            ),
        }
    }
}

/// A connected client session.
pub struct Session {
    shared: Arc<SessionShared>,
    recv_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Connects to the server and starts the receive thread.
    pub fn connect(peer: impl ToSocketAddrs, config: SessionConfig) -> Result<Session> {
        let transport = TcpTransport::connect(peer, config.connect_timeout)?;
        let reader = transport.reader_stream()?;

        let shared = Arc::new(SessionShared {
            transport,
            wait_queue: MsgWaitQueue::new(),
            request_id: AtomicU32::new(0),
            state: Mutex::new(SessionState::Connected),
            sync: SyncPoint::new(),
            handler: Mutex::new(None),
            protocol_version: config.protocol_version,
            command_timeout: config.command_timeout,
            allow_compression: config.allow_compression,
        });

        let recv_thread = {
            let shared = shared.clone();
            let receiver = FrameReceiver::with_buffer_size(reader, config.recv_buffer_size);
            std::thread::Builder::new()
                .name("session/recv".to_owned())
                .spawn(move || Self::receive_thread(&shared, receiver))?
        };

        Ok(Session {
            shared,
            recv_thread: Mutex::new(Some(recv_thread)),
        })
    }

    fn receive_thread(shared: &SessionShared, mut receiver: FrameReceiver<TcpStream>) {
        loop {
            match receiver.receive() {
                Ok(Frame::Oversized { code, declared_size }) => {
                    log::debug!(
                        "dropping oversized message 0x{code:04X} ({declared_size} bytes)"
                    );
                }
                Ok(Frame::Message(frame)) => {
                    match Message::parse(&frame, shared.protocol_version) {
                        Ok(msg) => shared.route_message(msg),
                        Err(e) => log::debug!("discarding malformed frame: {e}"),
                    }
                }
                Err(e) => {
                    log::debug!("network receiver stopped: {e}");
                    break;
                }
            }
        }

        *shared.state.lock().unwrap() = SessionState::Disconnected;
        shared.sync.complete(SyncResult::CommFailure);
        shared.wait_queue.stop();
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.lock().unwrap()
    }

    pub fn protocol_version(&self) -> u8 {
        self.shared.protocol_version
    }

    pub fn command_timeout(&self) -> Duration {
        self.shared.command_timeout
    }

    /// Registers the handler receiving asynchronous events. Replaces any
    /// previous handler.
    pub fn set_event_handler(&self, handler: Arc<SessionEventHandler>) {
        *self.shared.handler.lock().unwrap() = Some(handler);
    }

    /// Allocates the next request id.
    pub fn create_request_id(&self) -> u32 {
        self.shared.request_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Serializes and sends a message. Sends are ordered; a frame is never
    /// interleaved with another sender's frame.
    pub fn send_message(&self, msg: &Message) -> Result<()> {
        if self.state() == SessionState::Disconnected {
            return Err(Error::NotConnected);
        }
        let frame = msg.serialize(self.shared.allow_compression);
        self.shared.transport.send_frame(&frame)?;
        Ok(())
    }

    /// Waits up to the command timeout for a structured message with the
    /// given code and id.
    pub fn wait_for_message(&self, code: u16, id: u32) -> Result<Message> {
        match self
            .shared
            .wait_queue
            .wait_for(code, id, self.shared.command_timeout)
        {
            Some(msg) => Ok(msg),
            None if self.state() == SessionState::Disconnected => Err(Error::CommFailure),
            None => Err(Error::Timeout),
        }
    }

    /// As [`Session::wait_for_message`] for binary messages.
    pub fn wait_for_binary_message(&self, code: u16, id: u32) -> Result<Message> {
        match self
            .shared
            .wait_queue
            .wait_for_binary(code, id, self.shared.command_timeout)
        {
            Some(msg) => Ok(msg),
            None if self.state() == SessionState::Disconnected => Err(Error::CommFailure),
            None => Err(Error::Timeout),
        }
    }

    /// Sends a request and waits for its completion message
    /// ([`codes::CMD_REQUEST_COMPLETED`] with the allocated id).
    pub fn request(&self, msg: &mut Message) -> Result<Message> {
        self.request_with_response_code(msg, codes::CMD_REQUEST_COMPLETED)
    }

    /// Sends a request and waits for a response with a specific code.
    pub fn request_with_response_code(
        &self,
        msg: &mut Message,
        response_code: u16,
    ) -> Result<Message> {
        let id = self.create_request_id();
        msg.set_id(id);
        self.send_message(msg)?;
        self.wait_for_message(response_code, id)
    }

    /// Arms the sync point and marks the session as syncing.
    pub fn prepare_sync(&self) {
        self.shared.sync.prepare();
        let mut state = self.shared.state.lock().unwrap();
        if *state == SessionState::Connected || *state == SessionState::Idle {
            *state = SessionState::Syncing;
        }
    }

    /// Blocks until the pending sync completes. The receive thread
    /// completes it with comm-failure when the connection dies.
    pub fn wait_for_sync(&self, timeout: Duration) -> Result<()> {
        let result = self.shared.sync.wait(timeout);
        let mut state = self.shared.state.lock().unwrap();
        if *state == SessionState::Syncing {
            *state = SessionState::Connected;
        }
        result
    }

    /// Completes the pending sync operation.
    pub fn complete_sync(&self, result: SyncResult) {
        self.shared.sync.complete(result);
    }

    /// Shuts the socket both ways, stops the receive thread and releases
    /// every waiter with a communication failure.
    pub fn disconnect(&self) {
        self.shared.transport.shutdown();
        if let Some(thread) = self.recv_thread.lock().unwrap().take() {
            let _ = thread.join();
        }
        *self.shared.state.lock().unwrap() = SessionState::Disconnected;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.disconnect();
    }
}

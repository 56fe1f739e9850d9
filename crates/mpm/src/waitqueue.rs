//! Message wait queue: a TTL-bounded staging area where the receive thread
//! parks responses until the requesting thread collects them.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use mpm_msg::Message;

/// Housekeeper wakeup period.
pub const TTL_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// Upper bound on one blocking slice inside `wait_for`.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Default time-to-live of an unconsumed message.
pub const DEFAULT_HOLD_TIME: Duration = Duration::from_secs(30);

struct Element {
    code: u16,
    id: u32,
    is_binary: bool,
    ttl: Duration,
    msg: Message,
}

struct State {
    elements: Vec<Element>,
    hold_time: Duration,
    stopped: bool,
}

struct Shared {
    state: Mutex<State>,
    // Signaled on insert and on stop.
    changed: Condvar,
}

/// A bounded-lifetime message store indexed by `(code, id, binary)`.
///
/// Entries are evicted when their TTL expires; within one `(code, id)` pair
/// delivery is FIFO and at-most-once.
pub struct MsgWaitQueue {
    shared: Arc<Shared>,
    housekeeper: Mutex<Option<JoinHandle<()>>>,
}

impl MsgWaitQueue {
    pub fn new() -> MsgWaitQueue {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                elements: Vec::new(),
                hold_time: DEFAULT_HOLD_TIME,
                stopped: false,
            }),
            changed: Condvar::new(),
        });

        let housekeeper = {
            let shared = shared.clone();
            std::thread::Builder::new()
                .name("msgwq/keeper".to_owned())
                .spawn(move || Self::housekeeper_thread(&shared))
                .expect("cannot spawn wait queue housekeeper")
        };

        MsgWaitQueue {
            shared,
            housekeeper: Mutex::new(Some(housekeeper)),
        }
    }

    /// Ages entries every [`TTL_CHECK_INTERVAL`] and evicts expired ones.
    fn housekeeper_thread(shared: &Shared) {
        let mut state = shared.state.lock().unwrap();
        loop {
            let deadline = Instant::now() + TTL_CHECK_INTERVAL;
            loop {
                let now = Instant::now();
                if state.stopped || now >= deadline {
                    break;
                }
                let (s, _) = shared.changed.wait_timeout(state, deadline - now).unwrap();
                state = s;
            }
            if state.stopped {
                break;
            }

            state.elements.retain_mut(|e| {
                if e.ttl <= TTL_CHECK_INTERVAL {
                    log::debug!("message {} (code 0x{:04X}) expired in wait queue", e.id, e.code);
                    false
                } else {
                    e.ttl -= TTL_CHECK_INTERVAL;
                    true
                }
            });
        }
    }

    /// Sets the TTL applied to subsequently inserted messages.
    pub fn set_hold_time(&self, hold_time: Duration) {
        self.shared.state.lock().unwrap().hold_time = hold_time;
    }

    /// Inserts a message, waking any matching waiter.
    pub fn put(&self, msg: Message) {
        let mut state = self.shared.state.lock().unwrap();
        if state.stopped {
            return;
        }
        let ttl = state.hold_time;
        state.elements.push(Element {
            code: msg.code(),
            id: msg.id(),
            is_binary: msg.is_binary(),
            ttl,
            msg,
        });
        self.shared.changed.notify_all();
    }

    /// Waits for a structured message with the given code and id.
    pub fn wait_for(&self, code: u16, id: u32, timeout: Duration) -> Option<Message> {
        self.wait_internal(code, id, false, timeout)
    }

    /// Waits for a binary message with the given code and id.
    pub fn wait_for_binary(&self, code: u16, id: u32, timeout: Duration) -> Option<Message> {
        self.wait_internal(code, id, true, timeout)
    }

    fn wait_internal(
        &self,
        code: u16,
        id: u32,
        is_binary: bool,
        timeout: Duration,
    ) -> Option<Message> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock().unwrap();
        loop {
            if let Some(index) = state
                .elements
                .iter()
                .position(|e| e.code == code && e.id == id && e.is_binary == is_binary)
            {
                return Some(state.elements.remove(index).msg);
            }
            if state.stopped {
                return None;
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let slice = (deadline - now).min(WAIT_POLL_INTERVAL);
            let (s, _) = self.shared.changed.wait_timeout(state, slice).unwrap();
            state = s;
        }
    }

    /// Number of queued messages.
    pub fn len(&self) -> usize {
        self.shared.state.lock().unwrap().elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every queued message.
    pub fn clear(&self) {
        self.shared.state.lock().unwrap().elements.clear();
    }

    /// Stops the housekeeper and releases all waiters (they return `None`).
    /// Safe to call concurrently with `wait_for`.
    pub fn stop(&self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.stopped = true;
            state.elements.clear();
            self.shared.changed.notify_all();
        }
        if let Some(handle) = self.housekeeper.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl Default for MsgWaitQueue {
    fn default() -> Self {
        MsgWaitQueue::new()
    }
}

impl Drop for MsgWaitQueue {
    fn drop(&mut self) {
        self.stop();
    }
}

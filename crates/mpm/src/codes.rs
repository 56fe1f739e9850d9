//! Command codes known to the session runtime.
//!
//! Only the codes the session itself routes are defined here; all other
//! codes are opaque to this layer and flow into the message wait queue.

pub const CMD_KEEPALIVE: u16 = 0x0001;
pub const CMD_LOGIN: u16 = 0x0002;
pub const CMD_LOGIN_RESPONSE: u16 = 0x0003;
pub const CMD_REQUEST_COMPLETED: u16 = 0x0004;

// Object database stream.
pub const CMD_OBJECT: u16 = 0x0010;
pub const CMD_OBJECT_UPDATE: u16 = 0x0011;
pub const CMD_OBJECT_LIST_END: u16 = 0x0012;

// Event processing stream.
pub const CMD_EVENT: u16 = 0x0020;
pub const CMD_EVENT_LIST_END: u16 = 0x0021;
pub const CMD_EVENT_DB_RECORD: u16 = 0x0022;
pub const CMD_SYSLOG_RECORD: u16 = 0x0023;

// Alarms, actions and generic notifications.
pub const CMD_ALARM_UPDATE: u16 = 0x0030;
pub const CMD_ACTION_DB_UPDATE: u16 = 0x0031;
pub const CMD_NOTIFY: u16 = 0x0032;

// User database stream.
pub const CMD_USER_DATA: u16 = 0x0040;
pub const CMD_GROUP_DATA: u16 = 0x0041;
pub const CMD_USER_DB_EOF: u16 = 0x0042;
pub const CMD_USER_DB_UPDATE: u16 = 0x0043;

// Data collection items.
pub const CMD_NODE_DCI: u16 = 0x0050;
pub const CMD_NODE_DCI_LIST_END: u16 = 0x0051;

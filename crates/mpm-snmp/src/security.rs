//! Security context data for SNMP sessions.
//!
//! The USM (v3) credential set is carried as plain data only; no
//! authentication or privacy algorithms are implemented at the PDU layer.

/// Authentication method for a USM user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthMethod {
    #[default]
    None,
    Md5,
    Sha1,
}

/// Privacy (encryption) method for a USM user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrivMethod {
    #[default]
    None,
    Des,
    Aes,
}

/// Credentials attached to an SNMP target: a community string for v1/v2c,
/// or a USM user for v3-capable callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnmpSecurityContext {
    Community(String),
    UsmUser {
        user_name: String,
        auth_method: AuthMethod,
        priv_method: PrivMethod,
        auth_password: String,
        priv_password: String,
    },
}

impl SnmpSecurityContext {
    pub fn community(value: &str) -> SnmpSecurityContext {
        SnmpSecurityContext::Community(value.to_owned())
    }

    /// The community string, or the user name for USM contexts.
    pub fn name(&self) -> &str {
        match self {
            SnmpSecurityContext::Community(c) => c,
            SnmpSecurityContext::UsmUser { user_name, .. } => user_name,
        }
    }
}

impl Default for SnmpSecurityContext {
    fn default() -> Self {
        SnmpSecurityContext::Community("public".to_owned())
    }
}

use crate::handle::Handle;
use crate::permissions::PermissionSet;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Type tag reserved for the administrative value of a handle.
pub const ADMIN_TYPE: &str = "HS_ADMIN";

/// One typed, indexed datum attached to a handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Value {
    /// Positive, unique within the handle, assigned by the creator and never
    /// reassigned to a different value during the handle's lifetime.
    pub index: u32,
    /// Short type tag, e.g. `URL`, `EMAIL`, `DESC`, or [`ADMIN_TYPE`].
    pub value_type: String,
    /// Seconds since UNIX_EPOCH, stamped on write.
    #[serde(default)]
    pub timestamp: u64,
    /// Time-to-live in seconds; 0 selects the service-wide default.
    #[serde(default)]
    pub ttl: u32,
    pub payload: Payload,
    #[serde(default)]
    pub perms: ValuePerms,
}

impl Value {
    /// Plain text value with default visibility.
    pub fn text(index: u32, value_type: &str, text: &str) -> Self {
        Self {
            index,
            value_type: value_type.to_string(),
            timestamp: 0,
            ttl: 0,
            payload: Payload::Text(text.to_string()),
            perms: ValuePerms::default(),
        }
    }

    /// Administrative value delegating control to another handle's record.
    pub fn admin(index: u32, record: AdminRecord) -> Self {
        Self {
            index,
            value_type: ADMIN_TYPE.to_string(),
            timestamp: 0,
            ttl: 0,
            payload: Payload::Admin(record),
            perms: ValuePerms {
                public_read: false,
                public_write: false,
            },
        }
    }

    pub fn is_admin(&self) -> bool {
        self.value_type == ADMIN_TYPE
    }

    pub fn admin_record(&self) -> Option<&AdminRecord> {
        match &self.payload {
            Payload::Admin(record) => Some(record),
            Payload::Text(_) => None,
        }
    }

    /// Structural validation: index is positive and the payload kind matches
    /// the type tag.
    pub fn validate(&self) -> Result<(), ValueError> {
        if self.index == 0 {
            return Err(ValueError::ZeroIndex);
        }
        match (&self.payload, self.is_admin()) {
            (Payload::Admin(_), true) | (Payload::Text(_), false) => Ok(()),
            (Payload::Admin(_), false) => Err(ValueError::AdminPayloadOnPlainType {
                value_type: self.value_type.clone(),
            }),
            (Payload::Text(_), true) => Err(ValueError::PlainPayloadOnAdminType),
        }
    }

    /// Stamp the write timestamp with the current wall clock.
    pub fn stamp(&mut self) {
        self.timestamp = now_secs();
    }

    /// Whether `timestamp + ttl` has elapsed, with `ttl == 0` resolved to
    /// `default_ttl`.
    pub fn is_expired(&self, default_ttl: u32, now: u64) -> bool {
        let ttl = if self.ttl == 0 { default_ttl } else { self.ttl };
        self.timestamp.saturating_add(u64::from(ttl)) <= now
    }
}

/// Current wall clock in whole seconds since UNIX_EPOCH.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Payload of a value: a string for simple types, a structured
/// administrative record for [`ADMIN_TYPE`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Payload {
    Text(String),
    Admin(AdminRecord),
}

/// Per-value read/write flags, independent of the handle-level admin record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValuePerms {
    pub public_read: bool,
    pub public_write: bool,
}

impl Default for ValuePerms {
    fn default() -> Self {
        Self {
            public_read: true,
            public_write: false,
        }
    }
}

/// Delegated administration: the permission bits governing this handle live
/// at `referenced_handle[referenced_index]`, resolved one hop at check time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminRecord {
    pub referenced_handle: Handle,
    pub referenced_index: u32,
    pub permissions: PermissionSet,
}

/// Structural validation failures for a single value.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValueError {
    #[error("value index must be positive")]
    ZeroIndex,
    #[error("value of type '{value_type}' must not carry an administrative payload")]
    AdminPayloadOnPlainType { value_type: String },
    #[error("administrative value must carry an administrative payload")]
    PlainPayloadOnAdminType,
}

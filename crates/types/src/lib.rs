//! Shared data model for the pidgate identifier resolution service.
//!
//! A handle (`prefix/suffix`) owns an ordered set of typed values plus one
//! administrative value whose permission bits are delegated to another
//! handle's record. These types carry no storage or HTTP concerns.

pub mod handle;
pub mod permissions;
pub mod value;

pub use handle::{Handle, HandleParseError, MAX_HANDLE_LEN};
pub use permissions::{Operation, PermissionParseError, PermissionSet};
pub use value::{now_secs, AdminRecord, Payload, Value, ValueError, ValuePerms, ADMIN_TYPE};

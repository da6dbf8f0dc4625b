use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Maximum accepted length of the full `prefix/suffix` string.
pub const MAX_HANDLE_LEN: usize = 255;

/// Persistent identifier of the form `prefix/suffix`.
///
/// The prefix names a registered naming authority (e.g. `10.123`), the suffix
/// is locally unique within that prefix and case-sensitive. A handle is
/// immutable once created; deletion removes it entirely.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Handle {
    prefix: String,
    suffix: String,
}

impl Handle {
    /// Parse and validate a `prefix/suffix` string.
    pub fn parse(raw: &str) -> Result<Self, HandleParseError> {
        if raw.len() > MAX_HANDLE_LEN {
            return Err(HandleParseError::TooLong {
                len: raw.len(),
                max: MAX_HANDLE_LEN,
            });
        }
        let (prefix, suffix) =
            raw.split_once('/')
                .ok_or_else(|| HandleParseError::MissingSeparator {
                    handle: raw.to_string(),
                })?;
        if prefix.is_empty() || suffix.is_empty() {
            return Err(HandleParseError::EmptyComponent {
                handle: raw.to_string(),
            });
        }
        if raw.chars().any(char::is_whitespace) {
            return Err(HandleParseError::Whitespace {
                handle: raw.to_string(),
            });
        }
        Ok(Self {
            prefix: prefix.to_string(),
            suffix: suffix.to_string(),
        })
    }

    /// Build a handle from already-separated components.
    pub fn from_parts(prefix: &str, suffix: &str) -> Result<Self, HandleParseError> {
        Self::parse(&format!("{prefix}/{suffix}"))
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.prefix, self.suffix)
    }
}

impl FromStr for Handle {
    type Err = HandleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Handle {
    type Error = HandleParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Handle> for String {
    fn from(handle: Handle) -> Self {
        handle.to_string()
    }
}

/// Errors raised while validating a handle string.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandleParseError {
    #[error("handle '{handle}' must contain a '/' separating prefix and suffix")]
    MissingSeparator { handle: String },
    #[error("handle '{handle}' has an empty prefix or suffix")]
    EmptyComponent { handle: String },
    #[error("handle '{handle}' must not contain whitespace")]
    Whitespace { handle: String },
    #[error("handle length {len} exceeds maximum of {max}")]
    TooLong { len: usize, max: usize },
}

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Operations gated by an administrative permission bitstring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    AddValue,
    DeleteValue,
    ModifyValue,
    AddAdmin,
    DeleteAdmin,
    ModifyAdmin,
    ReadValue,
    ListHandle,
    DeleteHandle,
    AddNamingAuthority,
    DeleteNamingAuthority,
    ListNamingAuthorities,
}

impl Operation {
    /// Bit assignment for the textual bitstring, position 0 = least
    /// significant = rightmost character. This table is the single place the
    /// mapping lives; a deployment with a different fixture convention only
    /// changes the order here.
    pub const BIT_ORDER: [Operation; 12] = [
        Operation::AddValue,
        Operation::DeleteValue,
        Operation::ModifyValue,
        Operation::AddAdmin,
        Operation::DeleteAdmin,
        Operation::ModifyAdmin,
        Operation::ReadValue,
        Operation::ListHandle,
        Operation::DeleteHandle,
        Operation::AddNamingAuthority,
        Operation::DeleteNamingAuthority,
        Operation::ListNamingAuthorities,
    ];

    /// Number of recognized operations. Bitstrings of any other length are
    /// malformed.
    pub const COUNT: usize = Self::BIT_ORDER.len();

    /// Bit position of this operation within the bitstring.
    pub fn bit(&self) -> usize {
        Self::BIT_ORDER
            .iter()
            .position(|op| op == self)
            .expect("operation present in BIT_ORDER")
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operation::AddValue => "add_value",
            Operation::DeleteValue => "delete_value",
            Operation::ModifyValue => "modify_value",
            Operation::AddAdmin => "add_admin",
            Operation::DeleteAdmin => "delete_admin",
            Operation::ModifyAdmin => "modify_admin",
            Operation::ReadValue => "read_value",
            Operation::ListHandle => "list_handle",
            Operation::DeleteHandle => "delete_handle",
            Operation::AddNamingAuthority => "add_naming_authority",
            Operation::DeleteNamingAuthority => "delete_naming_authority",
            Operation::ListNamingAuthorities => "list_naming_authorities",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Fixed-length permission flag set carried by an administrative record.
///
/// Serialized as its textual bitstring (e.g. `"011111110011"`). Operations
/// outside [`Operation::BIT_ORDER`] do not exist in the API, so anything not
/// explicitly granted is denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PermissionSet(u16);

impl PermissionSet {
    /// Parse a textual bitstring, rightmost character = bit 0.
    pub fn from_bitstring(raw: &str) -> Result<Self, PermissionParseError> {
        if raw.len() != Operation::COUNT {
            return Err(PermissionParseError::WrongLength {
                got: raw.len(),
                expected: Operation::COUNT,
            });
        }
        let mut bits = 0u16;
        for (pos, ch) in raw.chars().rev().enumerate() {
            match ch {
                '1' => bits |= 1 << pos,
                '0' => {}
                other => return Err(PermissionParseError::InvalidCharacter { ch: other }),
            }
        }
        Ok(Self(bits))
    }

    /// Grant every recognized operation.
    pub fn all() -> Self {
        Self((1u16 << Operation::COUNT) - 1)
    }

    /// Deny every operation.
    pub fn none() -> Self {
        Self(0)
    }

    pub fn allows(&self, op: Operation) -> bool {
        self.0 & (1 << op.bit()) != 0
    }

    pub fn to_bitstring(self) -> String {
        (0..Operation::COUNT)
            .rev()
            .map(|pos| if self.0 & (1 << pos) != 0 { '1' } else { '0' })
            .collect()
    }
}

impl fmt::Display for PermissionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_bitstring())
    }
}

impl TryFrom<String> for PermissionSet {
    type Error = PermissionParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_bitstring(&value)
    }
}

impl From<PermissionSet> for String {
    fn from(set: PermissionSet) -> Self {
        set.to_bitstring()
    }
}

/// Errors raised while parsing a permission bitstring.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PermissionParseError {
    #[error("malformed permission bitstring: got {got} bits, expected {expected}")]
    WrongLength { got: usize, expected: usize },
    #[error("malformed permission bitstring: invalid character '{ch}'")]
    InvalidCharacter { ch: char },
}

//! Error types for the rewrite rule table.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RewriteError {
    #[error("invalid rule (priority {priority}): {reason}")]
    InvalidRule { priority: u32, reason: String },

    #[error("failed to read rule file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse rule file: {0}")]
    Parse(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, RewriteError>;

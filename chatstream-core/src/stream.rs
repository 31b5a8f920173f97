//! Channel-friendly chat updates.
//!
//! Contract:
//! - A chat session emits 0..n `Token` updates.
//! - It then emits exactly one terminal update, either `Complete` or `Error`.
//! - Nothing follows a terminal update.
//!
//! `Error` holds a `StreamError`, which is not `Clone`. For that reason this
//! type derives neither `Clone` nor `PartialEq`.

use crate::error::StreamError;

/// What a channel consumer receives incrementally.
#[non_exhaustive]
#[derive(Debug)]
pub enum ChatUpdate {
    /// One incremental token, never the cumulative text.
    Token(String),
    /// Full accumulated text plus the server-assigned id, if the `done` event carried one.
    Complete {
        text: String,
        server_id: Option<String>,
    },
    /// Terminal failure; the session ends after this.
    Error(StreamError),
}

impl ChatUpdate {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Error(_))
    }

    pub fn as_token(&self) -> Option<&str> {
        match self {
            Self::Token(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("Request to {addr} timed out after {after:?}")]
    Timeout { addr: String, after: Duration },

    #[error("Connection error to {addr}: {reason}")]
    Connection { addr: String, reason: String },

    #[error("Peer answered {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Undecodable reply: {0}")]
    Decode(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Failed to bind {addr}: {reason}")]
    Bind { addr: String, reason: String },

    #[error("Server error: {0}")]
    Server(String),
}

impl NetworkError {
    /// True when the peer never produced an answer at all.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            NetworkError::Timeout { .. }
                | NetworkError::Connection { .. }
                | NetworkError::InvalidAddress(_)
        )
    }
}

// Escalated errors

use crate::consensus::RejectReason;
use std::fmt;

/// Errors surfaced by the engine and its collaborators.
///
/// `Rejected` wraps a local, non-fatal rejection of one block or transaction;
/// shared state is unchanged when it is returned. The other variants escalate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// Candidate rejected by consensus rules
    Rejected(RejectReason),
    /// The storage collaborator failed; no partial-mutation guarantee
    StorageFailure(String),
    /// Mining search exhausted the nonce space; refresh the template
    OutOfNonceSpace,
    /// Engine has no genesis yet
    Uninitialized,
    /// Bad configuration
    Config(String),
    /// Runtime or filesystem failure outside the block store
    Io(String),
    /// Output could not be encoded
    Encoding(String),
    /// Requested block or record does not exist
    NotFound(String),
    /// A spend could not be built for the given key
    Wallet(String),
}

impl fmt::Display for ChainError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ChainError::Rejected(reason) => write!(f, "Rejected: {}", reason),
            ChainError::StorageFailure(msg) => write!(f, "Storage failure: {}", msg),
            ChainError::OutOfNonceSpace => write!(f, "Nonce space exhausted"),
            ChainError::Uninitialized => write!(f, "Chain has no genesis block"),
            ChainError::Config(msg) => write!(f, "Configuration error: {}", msg),
            ChainError::Io(msg) => write!(f, "I/O error: {}", msg),
            ChainError::Encoding(msg) => write!(f, "Encoding error: {}", msg),
            ChainError::NotFound(what) => write!(f, "Not found: {}", what),
            ChainError::Wallet(msg) => write!(f, "Wallet error: {}", msg),
        }
    }
}

impl std::error::Error for ChainError {}

impl From<RejectReason> for ChainError {
    fn from(reason: RejectReason) -> Self {
        ChainError::Rejected(reason)
    }
}

impl ChainError {
    pub fn reject_reason(&self) -> Option<&RejectReason> {
        match self {
            ChainError::Rejected(reason) => Some(reason),
            _ => None,
        }
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, ChainError>;

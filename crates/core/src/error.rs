use thiserror::Error;

/// Failures talking to either remote side.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("Authentication failed: {0}")]
    Authentication(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Update of transaction {transaction_id} rejected: {reason}")]
    RemoteUpdate {
        transaction_id: String,
        reason: String,
    },
    #[error("Unexpected response: {0}")]
    Parse(String),
}

impl SourceError {
    /// Errors that end the whole run rather than a single transaction.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SourceError::RemoteUpdate { .. })
    }
}

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DisbursementError>;

#[derive(Error, Debug)]
pub enum DisbursementError {
    /// Bad caller input. Never retried.
    #[error("Validation error: {0}")]
    Validation(String),
    /// The gateway rejected our credentials. Resolved only by re-authentication.
    #[error("Authentication error: {0}")]
    Auth(String),
    /// Transport failure or non-2xx gateway response. Retried by the job runner.
    #[error("Gateway error: {0}")]
    Gateway(String),
    #[error("Not found: {0}")]
    NotFound(String),
    /// Attempted mutation of a terminal item. Benign race with another writer;
    /// every caller treats this as a silent no-op.
    #[error("Item is already finalized")]
    AlreadyFinalized,
    /// Ledger read or write failure. Surfaces from store backends; the
    /// in-memory store never produces it.
    #[error("Store error: {0}")]
    Store(String),
    #[error("Queue error: {0}")]
    Queue(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

use thiserror::Error;

/// A type alias for handling `Result`s with `Error`
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the transaction layer.
///
/// Only transaction creation can fail; in-flight failures (unreachable peer,
/// dropped response) express themselves as a timeout completion with a null
/// response.
#[derive(Error, Debug)]
pub enum Error {
    /// The message lacks the headers transaction matching needs
    #[error("Message unusable for a transaction: {0}")]
    Message(#[from] voxstack_sip_core::Error),

    /// A transaction with the same ID already exists
    #[error("Transaction already exists: {0}")]
    DuplicateTransaction(String),

    /// The request cannot start a transaction (e.g. an ACK)
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    /// The manager has been shut down
    #[error("Transaction manager closed")]
    Closed,

    /// Underlying transport refused the send outright
    #[error("Transport error: {0}")]
    Transport(#[from] voxstack_sip_transport::Error),
}

use thiserror::Error;

/// A type alias for handling `Result`s with `Error`
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in SIP message handling
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Invalid SIP method
    #[error("Invalid SIP method: {0}")]
    InvalidMethod(String),

    /// Invalid SIP version on the start line
    #[error("Invalid SIP version")]
    InvalidVersion,

    /// Invalid status code
    #[error("Invalid status code: {0}")]
    InvalidStatusCode(u16),

    /// Invalid SIP header syntax
    #[error("Invalid SIP header: {0}")]
    InvalidHeader(String),

    /// Invalid message format
    #[error("Invalid message format: {0}")]
    InvalidFormat(String),

    /// Message is not valid UTF-8 where text was required
    #[error("Message is not valid UTF-8")]
    InvalidUtf8,

    /// A header required by the operation is missing
    #[error("Missing required header: {0}")]
    MissingHeader(&'static str),
}

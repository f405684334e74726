use thiserror::Error;

/// A type alias for handling `Result`s with `Error`
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in RTP/RTCP/SRTP processing
#[derive(Error, Debug)]
pub enum Error {
    /// Buffer too small for the operation
    #[error("Buffer too small: required {required} bytes, available {available}")]
    BufferTooSmall {
        /// Required buffer size
        required: usize,
        /// Available buffer size
        available: usize,
    },

    /// Invalid RTP/RTCP version field
    #[error("Invalid protocol version: {0}")]
    InvalidVersion(u8),

    /// Malformed RTP packet
    #[error("Invalid RTP packet: {0}")]
    InvalidPacket(String),

    /// RTCP-specific error
    #[error("RTCP error: {0}")]
    RtcpError(String),

    /// SRTP authentication tag mismatch
    #[error("SRTP authentication failed")]
    AuthenticationFailure,

    /// SRTP replay protection rejected the packet
    #[error("SRTP replay check failed for index {0}")]
    ReplayedPacket(u64),

    /// SRTP keying or policy problem
    #[error("SRTP error: {0}")]
    SrtpError(String),

    /// DTLS handshake or protection failure
    #[error("DTLS error: {0}")]
    DtlsError(String),

    /// Media session configuration problem
    #[error("Session error: {0}")]
    SessionError(String),

    /// Underlying socket I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

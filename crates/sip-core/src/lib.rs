//! # voxstack-sip-core
//!
//! Compact SIP message model for the voxstack stack: requests, responses,
//! header access, parsing and serialization.
//!
//! This crate deliberately stays at the surface the transport and transaction
//! layers consume - start line, ordered headers with compact-form aliases,
//! the typed accessors transaction matching needs (top Via branch and
//! sent-by, CSeq, Call-ID, From/To tags, Content-Length), and builders for
//! responses and the automatically generated ACK. It is not a full RFC 3261
//! grammar; unknown headers are carried opaquely and left to upper layers.

pub mod builder;
pub mod error;
pub mod headers;
pub mod message;
pub mod method;
pub mod status;

pub use builder::{ack_for_non_2xx, response_for, RequestBuilder, ResponseBuilder};
pub use error::{Error, Result};
pub use headers::Headers;
pub use message::{find_header_end, parse_message, Message, Request, Response};
pub use method::Method;
pub use status::StatusCode;

/// Re-export of common types for easier use
pub mod prelude {
    pub use crate::{
        ack_for_non_2xx, parse_message, response_for, Headers, Message, Method, Request,
        RequestBuilder, Response, ResponseBuilder, StatusCode,
    };
}

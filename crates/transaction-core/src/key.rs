//! Transaction identification per RFC 3261 §17.2.3 / §17.1.3.
//!
//! A transaction is keyed by the top Via branch parameter, the Via sent-by,
//! and the CSeq method, plus which side of the exchange we are on. Requests
//! are matched with the server form; responses with the client form (the
//! same ingredients, roles inverted, since the response carries the Via set
//! of the request it answers).

use std::fmt;

use voxstack_sip_core::{Method, Request, Response};

use crate::error::Result;

/// Which side of the transaction this key identifies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionSide {
    Client,
    Server,
}

/// Unique transaction identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionKey {
    branch: String,
    sent_by: String,
    method: Method,
    side: TransactionSide,
}

impl TransactionKey {
    /// Server-side key for an incoming request.
    ///
    /// An ACK matches the INVITE server transaction it acknowledges, so its
    /// key is derived with method INVITE.
    pub fn server(request: &Request) -> Result<Self> {
        let branch = request.headers.require_branch()?.to_string();
        let sent_by = request
            .headers
            .top_via_sent_by()
            .unwrap_or_default()
            .to_string();
        let (_, mut method) = request.headers.require_cseq()?;
        if method == Method::Ack {
            method = Method::Invite;
        }
        Ok(Self {
            branch,
            sent_by,
            method,
            side: TransactionSide::Server,
        })
    }

    /// Client-side key for a request we are about to send
    pub fn client_for_request(request: &Request) -> Result<Self> {
        let branch = request.headers.require_branch()?.to_string();
        let sent_by = request
            .headers
            .top_via_sent_by()
            .unwrap_or_default()
            .to_string();
        let (_, method) = request.headers.require_cseq()?;
        Ok(Self {
            branch,
            sent_by,
            method,
            side: TransactionSide::Client,
        })
    }

    /// Client-side key for an incoming response
    pub fn client(response: &Response) -> Result<Self> {
        let branch = response.headers.require_branch()?.to_string();
        let sent_by = response
            .headers
            .top_via_sent_by()
            .unwrap_or_default()
            .to_string();
        let (_, method) = response.headers.require_cseq()?;
        Ok(Self {
            branch,
            sent_by,
            method,
            side: TransactionSide::Client,
        })
    }

    /// Whether two keys identify the same transaction, regardless of side
    pub fn corresponds(&self, other: &TransactionKey) -> bool {
        self.branch == other.branch
            && self.sent_by == other.sent_by
            && self.method == other.method
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn side(&self) -> TransactionSide {
        self.side
    }
}

impl fmt::Display for TransactionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let side = match self.side {
            TransactionSide::Client => "client",
            TransactionSide::Server => "server",
        };
        write!(f, "{}:{}:{}:{}", side, self.branch, self.sent_by, self.method)
    }
}

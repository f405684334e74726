use std::net::SocketAddr;

use voxstack_sip_core::{Request, Response};

use crate::key::TransactionKey;

/// Events delivered to the transaction user (TU).
///
/// Matched messages are consumed by their transaction state machines;
/// everything the machines do not absorb surfaces here.
#[derive(Debug, Clone)]
pub enum TransactionEvent {
    /// A request arrived that matches no server transaction
    RequestReceived {
        request: Request,
        source: SocketAddr,
    },

    /// A response arrived that matches no client transaction
    /// (e.g. a 200 to an INVITE retransmitted after the transaction ended)
    ResponseReceived {
        response: Response,
        source: SocketAddr,
    },

    /// A provisional (1xx) response arrived for a running client transaction
    ProvisionalReceived {
        key: TransactionKey,
        response: Response,
        source: SocketAddr,
    },

    /// A client transaction finished. `response` is `None` when Timer B/F
    /// expired without a final response.
    TransactionCompleted {
        key: TransactionKey,
        request: Request,
        response: Option<Response>,
        source: SocketAddr,
    },

    /// The ACK confirming a non-2xx final arrived at a server INVITE
    /// transaction
    AckReceived {
        key: TransactionKey,
        request: Request,
        source: SocketAddr,
    },

    /// An outgoing connection attempt failed at the transport
    ConnectionFailed { destination: SocketAddr },

    /// The underlying transport shut down
    TransportClosed,
}

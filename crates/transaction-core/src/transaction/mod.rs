//! The four RFC 3261 §17 transaction state machines.
//!
//! Machines are pure state: incoming messages arrive through
//! `on_request`/`on_response`, and the dispatcher calls `on_timer` at least
//! every tick interval. Deadlines live inside each machine. Every method
//! returns an [`Output`] describing the wire sends and TU events the
//! transition produced; the dispatcher performs the I/O and removes machines
//! that report `Terminated`. Keeping I/O out of the machines means no lock
//! is ever held across a send.

pub mod client_invite;
pub mod client_non_invite;
pub mod server_invite;
pub mod server_non_invite;

use std::net::SocketAddr;
use std::time::Instant;

use bytes::Bytes;

use voxstack_sip_core::{Request, Response};

use crate::events::TransactionEvent;

pub use client_invite::ClientInviteTransaction;
pub use client_non_invite::ClientNonInviteTransaction;
pub use server_invite::ServerInviteTransaction;
pub use server_non_invite::ServerNonInviteTransaction;

/// Transaction machine states across all four machine kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Client INVITE: initial request sent, no response yet
    Calling,
    /// Client non-INVITE / server non-INVITE initial state
    Trying,
    /// A provisional response has been seen/sent
    Proceeding,
    /// A final response has been seen/sent; absorbing retransmissions
    Completed,
    /// Server INVITE only: ACK received for a non-2xx final
    Confirmed,
    /// Done; the dispatcher removes the machine
    Terminated,
}

/// Side effects of one machine transition
#[derive(Debug, Default)]
pub struct Output {
    /// Messages to put on the wire, in order
    pub sends: Vec<(Bytes, SocketAddr)>,
    /// Events to deliver to the TU, in order
    pub events: Vec<TransactionEvent>,
}

impl Output {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn send(bytes: Bytes, destination: SocketAddr) -> Self {
        Self {
            sends: vec![(bytes, destination)],
            events: Vec::new(),
        }
    }

    pub fn event(event: TransactionEvent) -> Self {
        Self {
            sends: Vec::new(),
            events: vec![event],
        }
    }

    pub fn push_send(&mut self, bytes: Bytes, destination: SocketAddr) {
        self.sends.push((bytes, destination));
    }

    pub fn push_event(&mut self, event: TransactionEvent) {
        self.events.push(event);
    }
}

/// One of the four transaction machines, as stored in the manager's table
pub enum TransactionMachine {
    ClientInvite(ClientInviteTransaction),
    ClientNonInvite(ClientNonInviteTransaction),
    ServerInvite(ServerInviteTransaction),
    ServerNonInvite(ServerNonInviteTransaction),
}

impl TransactionMachine {
    pub fn state(&self) -> TransactionState {
        match self {
            TransactionMachine::ClientInvite(t) => t.state(),
            TransactionMachine::ClientNonInvite(t) => t.state(),
            TransactionMachine::ServerInvite(t) => t.state(),
            TransactionMachine::ServerNonInvite(t) => t.state(),
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.state() == TransactionState::Terminated
    }

    pub fn on_response(&mut self, response: Response, source: SocketAddr) -> Output {
        match self {
            TransactionMachine::ClientInvite(t) => t.on_response(response, source),
            TransactionMachine::ClientNonInvite(t) => t.on_response(response, source),
            // Server machines never receive responses.
            _ => Output::none(),
        }
    }

    pub fn on_request(&mut self, request: Request, source: SocketAddr) -> Output {
        match self {
            TransactionMachine::ServerInvite(t) => t.on_request(request, source),
            TransactionMachine::ServerNonInvite(t) => t.on_request(request, source),
            // A request matching a client transaction is a protocol error;
            // absorb it.
            _ => Output::none(),
        }
    }

    pub fn on_timer(&mut self, now: Instant) -> Output {
        match self {
            TransactionMachine::ClientInvite(t) => t.on_timer(now),
            TransactionMachine::ClientNonInvite(t) => t.on_timer(now),
            TransactionMachine::ServerInvite(t) => t.on_timer(now),
            TransactionMachine::ServerNonInvite(t) => t.on_timer(now),
        }
    }
}

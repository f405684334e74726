//! INVITE server transaction (RFC 3261 §17.2.1).
//!
//! Proceeding -> Completed -> Confirmed -> Terminated. A non-2xx final is
//! retransmitted on Timer G (doubling, capped at T2, unreliable transports
//! only) until the ACK arrives or Timer H gives up. A 2xx final releases
//! control to the dialog layer, which handles 2xx retransmission itself.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tracing::trace;

use voxstack_sip_core::{Method, Request, Response};

use crate::events::TransactionEvent;
use crate::key::TransactionKey;
use crate::timer::TimerSettings;
use crate::transaction::{Output, TransactionState};

pub struct ServerInviteTransaction {
    key: TransactionKey,
    request: Request,
    source: SocketAddr,
    reliable: bool,
    settings: TimerSettings,
    state: TransactionState,

    last_response: Response,
    /// Timer G deadline while Completed (unreliable transports)
    retransmit_at: Option<Instant>,
    retransmit_interval: Duration,
    /// Timer H deadline: give up waiting for the ACK
    ack_timeout_at: Option<Instant>,
    /// Timer I deadline while Confirmed
    absorb_until: Option<Instant>,
}

impl ServerInviteTransaction {
    /// Create the transaction. The returned output carries the initial
    /// response send (typically a 100 Trying).
    pub fn start(
        key: TransactionKey,
        request: Request,
        source: SocketAddr,
        initial_response: Response,
        reliable: bool,
        settings: TimerSettings,
    ) -> (Self, Output) {
        let output = Output::send(initial_response.to_bytes(), source);
        let retransmit_interval = settings.t1;
        let mut tx = Self {
            key,
            request,
            source,
            reliable,
            settings,
            state: TransactionState::Proceeding,
            last_response: initial_response,
            retransmit_at: None,
            retransmit_interval,
            ack_timeout_at: None,
            absorb_until: None,
        };
        tx.apply_response_state();
        (tx, output)
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Send a further response through this transaction
    pub fn send_response(&mut self, response: Response) -> Output {
        if !matches!(self.state, TransactionState::Proceeding) {
            return Output::none();
        }
        let output = Output::send(response.to_bytes(), self.source);
        self.last_response = response;
        self.apply_response_state();
        output
    }

    pub fn on_request(&mut self, request: Request, source: SocketAddr) -> Output {
        if request.method == Method::Ack {
            if self.state == TransactionState::Completed {
                trace!(key = %self.key, "ACK received, transaction confirmed");
                self.retransmit_at = None;
                self.ack_timeout_at = None;
                if self.reliable {
                    self.state = TransactionState::Terminated;
                } else {
                    self.state = TransactionState::Confirmed;
                    self.absorb_until = Some(Instant::now() + self.settings.timer_i());
                }
                return Output::event(TransactionEvent::AckReceived {
                    key: self.key.clone(),
                    request,
                    source,
                });
            }
            // ACK retransmission in Confirmed: absorb.
            return Output::none();
        }

        // Retransmitted INVITE: replay the latest response.
        if matches!(
            self.state,
            TransactionState::Proceeding | TransactionState::Completed
        ) {
            return Output::send(self.last_response.to_bytes(), self.source);
        }
        Output::none()
    }

    pub fn on_timer(&mut self, now: Instant) -> Output {
        match self.state {
            TransactionState::Completed => {
                if self.ack_timeout_at.is_some_and(|at| now >= at) {
                    trace!(key = %self.key, "Timer H fired, no ACK received");
                    self.state = TransactionState::Terminated;
                    return Output::event(TransactionEvent::TransactionCompleted {
                        key: self.key.clone(),
                        request: self.request.clone(),
                        response: None,
                        source: self.source,
                    });
                }
                if let Some(at) = self.retransmit_at {
                    if now >= at {
                        self.retransmit_interval =
                            (self.retransmit_interval * 2).min(self.settings.t2);
                        self.retransmit_at = Some(now + self.retransmit_interval);
                        return Output::send(self.last_response.to_bytes(), self.source);
                    }
                }
                Output::none()
            }
            TransactionState::Confirmed => {
                if self.absorb_until.is_some_and(|until| now >= until) {
                    self.state = TransactionState::Terminated;
                }
                Output::none()
            }
            _ => Output::none(),
        }
    }

    fn apply_response_state(&mut self) {
        let status = self.last_response.status;
        if status.is_provisional() {
            self.state = TransactionState::Proceeding;
        } else if status.is_success() {
            // 2xx: retransmission and the ACK belong to the dialog layer.
            self.state = TransactionState::Terminated;
        } else {
            self.state = TransactionState::Completed;
            let now = Instant::now();
            self.ack_timeout_at = Some(now + self.settings.timer_h);
            if !self.reliable {
                self.retransmit_interval = self.settings.t1;
                self.retransmit_at = Some(now + self.retransmit_interval);
            }
        }
    }
}

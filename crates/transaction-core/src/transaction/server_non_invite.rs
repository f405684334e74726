//! Non-INVITE server transaction (RFC 3261 §17.2.2).
//!
//! Created with the initial response, which is sent at start. Retransmitted
//! requests re-trigger the latest response; Timer J keeps the machine alive
//! in Completed long enough to absorb stragglers on unreliable transports.

use std::net::SocketAddr;
use std::time::Instant;

use voxstack_sip_core::{Request, Response};

use crate::key::TransactionKey;
use crate::timer::TimerSettings;
use crate::transaction::{Output, TransactionState};

pub struct ServerNonInviteTransaction {
    #[allow(dead_code)]
    key: TransactionKey,
    request: Request,
    source: SocketAddr,
    reliable: bool,
    settings: TimerSettings,
    state: TransactionState,

    last_response: Response,
    /// Timer J deadline, set on entering Completed
    absorb_until: Option<Instant>,
}

impl ServerNonInviteTransaction {
    /// Create the transaction. The returned output carries the initial
    /// response send.
    pub fn start(
        key: TransactionKey,
        request: Request,
        source: SocketAddr,
        initial_response: Response,
        reliable: bool,
        settings: TimerSettings,
    ) -> (Self, Output) {
        let output = Output::send(initial_response.to_bytes(), source);
        let mut tx = Self {
            key,
            request,
            source,
            reliable,
            settings,
            state: TransactionState::Trying,
            last_response: initial_response,
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
        if matches!(
            self.state,
            TransactionState::Completed | TransactionState::Terminated
        ) {
            // A final response has already been committed.
            return Output::none();
        }
        let output = Output::send(response.to_bytes(), self.source);
        self.last_response = response;
        self.apply_response_state();
        output
    }

    pub fn on_request(&mut self, _request: Request, _source: SocketAddr) -> Output {
        // Retransmitted request: replay the latest response, never surface
        // the duplicate to the TU.
        match self.state {
            TransactionState::Trying
            | TransactionState::Proceeding
            | TransactionState::Completed => {
                Output::send(self.last_response.to_bytes(), self.source)
            }
            _ => Output::none(),
        }
    }

    pub fn on_timer(&mut self, now: Instant) -> Output {
        if self.state == TransactionState::Completed
            && self.absorb_until.is_some_and(|until| now >= until)
        {
            self.state = TransactionState::Terminated;
        }
        Output::none()
    }

    fn apply_response_state(&mut self) {
        if self.last_response.status.is_provisional() {
            self.state = TransactionState::Proceeding;
        } else if self.reliable {
            self.state = TransactionState::Terminated;
        } else {
            self.state = TransactionState::Completed;
            self.absorb_until = Some(Instant::now() + self.settings.timer_j);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use voxstack_sip_core::{response_for, Method, RequestBuilder, StatusCode};

    fn options_request() -> Request {
        RequestBuilder::new(Method::Options, "sip:bob@198.51.100.2")
            .via("198.51.100.1:5060", "udp", "z9hG4bK-sni1")
            .from("sip:alice@198.51.100.1", Some("ft"))
            .to("sip:bob@198.51.100.2", None)
            .call_id("sni-test")
            .cseq(3)
            .build()
    }

    fn source() -> SocketAddr {
        "198.51.100.1:5060".parse().unwrap()
    }

    #[test]
    fn test_final_initial_response_completes() {
        let request = options_request();
        let key = TransactionKey::server(&request).unwrap();
        let response = response_for(&request, StatusCode::OK, Some("tt"));
        let (tx, output) = ServerNonInviteTransaction::start(
            key,
            request,
            source(),
            response,
            false,
            TimerSettings::default(),
        );
        assert_eq!(tx.state(), TransactionState::Completed);
        assert_eq!(output.sends.len(), 1);
        assert!(output.sends[0].0.starts_with(b"SIP/2.0 200"));
    }

    #[test]
    fn test_retransmitted_request_replays_response() {
        let request = options_request();
        let key = TransactionKey::server(&request).unwrap();
        let response = response_for(&request, StatusCode::OK, Some("tt"));
        let (mut tx, _) = ServerNonInviteTransaction::start(
            key,
            request.clone(),
            source(),
            response,
            false,
            TimerSettings::default(),
        );
        let output = tx.on_request(request, source());
        assert_eq!(output.sends.len(), 1);
        assert!(output.sends[0].0.starts_with(b"SIP/2.0 200"));
        assert!(output.events.is_empty());
    }

    #[test]
    fn test_provisional_then_final() {
        let request = options_request();
        let key = TransactionKey::server(&request).unwrap();
        let trying = response_for(&request, StatusCode::TRYING, None);
        let (mut tx, _) = ServerNonInviteTransaction::start(
            key,
            request.clone(),
            source(),
            trying,
            false,
            TimerSettings::default(),
        );
        assert_eq!(tx.state(), TransactionState::Proceeding);

        let ok = response_for(&request, StatusCode::OK, Some("tt"));
        let output = tx.send_response(ok);
        assert_eq!(tx.state(), TransactionState::Completed);
        assert_eq!(output.sends.len(), 1);

        // Further responses after the final are refused.
        let late = response_for(&request, StatusCode::NOT_FOUND, Some("tt"));
        assert!(tx.send_response(late).sends.is_empty());
    }

    #[test]
    fn test_timer_j_terminates() {
        let request = options_request();
        let key = TransactionKey::server(&request).unwrap();
        let response = response_for(&request, StatusCode::OK, Some("tt"));
        let mut settings = TimerSettings::default();
        settings.timer_j = Duration::from_millis(5);
        let (mut tx, _) =
            ServerNonInviteTransaction::start(key, request, source(), response, false, settings);
        tx.on_timer(Instant::now() + Duration::from_millis(10));
        assert_eq!(tx.state(), TransactionState::Terminated);
    }

    #[test]
    fn test_reliable_final_terminates_immediately() {
        let request = options_request();
        let key = TransactionKey::server(&request).unwrap();
        let response = response_for(&request, StatusCode::OK, Some("tt"));
        let (tx, _) = ServerNonInviteTransaction::start(
            key,
            request,
            source(),
            response,
            true,
            TimerSettings::default(),
        );
        assert_eq!(tx.state(), TransactionState::Terminated);
    }
}

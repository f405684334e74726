//! INVITE client transaction (RFC 3261 §17.1.1).
//!
//! Calling -> Proceeding -> Completed -> Terminated. Timer A doubles
//! without a cap while Calling (unreliable transports); Timer B bounds the
//! attempt. A non-2xx final is ACKed automatically and the transaction
//! lingers in Completed for Timer D to absorb retransmitted finals. A 2xx
//! terminates immediately; the dialog layer owns that ACK.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use voxstack_sip_core::{ack_for_non_2xx, Request, Response};

use crate::events::TransactionEvent;
use crate::key::TransactionKey;
use crate::timer::TimerSettings;
use crate::transaction::{Output, TransactionState};

pub struct ClientInviteTransaction {
    key: TransactionKey,
    request: Request,
    destination: SocketAddr,
    reliable: bool,
    settings: TimerSettings,
    state: TransactionState,

    /// Timer A deadline; `None` on reliable transports or once Proceeding
    retransmit_at: Option<Instant>,
    retransmit_interval: Duration,
    /// Timer B deadline
    timeout_at: Instant,
    /// Timer D deadline, set on entering Completed
    absorb_until: Option<Instant>,
    /// ACK sent for the non-2xx final, re-sent on retransmitted finals
    ack: Option<Request>,
}

impl ClientInviteTransaction {
    /// Create the transaction. The returned output carries the INVITE send;
    /// `attempt_timeout` overrides Timer B.
    pub fn start(
        key: TransactionKey,
        request: Request,
        destination: SocketAddr,
        reliable: bool,
        settings: TimerSettings,
        attempt_timeout: Option<Duration>,
    ) -> (Self, Output) {
        let now = Instant::now();
        let timer_b = attempt_timeout.unwrap_or(settings.timer_b);
        let retransmit_at = (!reliable).then(|| now + settings.t1);
        let retransmit_interval = settings.t1;
        let output = Output::send(request.to_bytes(), destination);

        let tx = Self {
            key,
            request,
            destination,
            reliable,
            settings,
            state: TransactionState::Calling,
            retransmit_at,
            retransmit_interval,
            timeout_at: now + timer_b,
            absorb_until: None,
            ack: None,
        };
        (tx, output)
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn on_response(&mut self, response: Response, source: SocketAddr) -> Output {
        match self.state {
            TransactionState::Calling | TransactionState::Proceeding => {
                if response.status.is_provisional() {
                    self.state = TransactionState::Proceeding;
                    self.retransmit_at = None;
                    return Output::event(TransactionEvent::ProvisionalReceived {
                        key: self.key.clone(),
                        response,
                        source,
                    });
                }
                if response.status.is_success() {
                    // 2xx: the dialog layer takes over, including the ACK.
                    self.state = TransactionState::Terminated;
                    return Output::event(TransactionEvent::TransactionCompleted {
                        key: self.key.clone(),
                        request: self.request.clone(),
                        response: Some(response),
                        source,
                    });
                }
                // Non-2xx final: ACK it ourselves and absorb retransmissions.
                let mut output = Output::none();
                self.build_ack(&response, &mut output);
                self.retransmit_at = None;
                if self.reliable {
                    self.state = TransactionState::Terminated;
                } else {
                    self.state = TransactionState::Completed;
                    self.absorb_until = Some(Instant::now() + self.settings.timer_d);
                }
                output.push_event(TransactionEvent::TransactionCompleted {
                    key: self.key.clone(),
                    request: self.request.clone(),
                    response: Some(response),
                    source,
                });
                output
            }
            TransactionState::Completed => {
                // Retransmitted final: re-send the ACK, no new event.
                if response.status.is_final() && !response.status.is_success() {
                    if let Some(ack) = &self.ack {
                        return Output::send(ack.to_bytes(), self.destination);
                    }
                }
                Output::none()
            }
            _ => Output::none(),
        }
    }

    pub fn on_timer(&mut self, now: Instant) -> Output {
        match self.state {
            TransactionState::Calling | TransactionState::Proceeding => {
                if now >= self.timeout_at {
                    trace!(key = %self.key, "Timer B fired");
                    self.state = TransactionState::Terminated;
                    return Output::event(TransactionEvent::TransactionCompleted {
                        key: self.key.clone(),
                        request: self.request.clone(),
                        response: None,
                        source: self.destination,
                    });
                }
                if self.state == TransactionState::Calling {
                    if let Some(at) = self.retransmit_at {
                        if now >= at {
                            // Timer A doubles unboundedly; Timer B ends the
                            // attempt.
                            self.retransmit_interval *= 2;
                            self.retransmit_at = Some(now + self.retransmit_interval);
                            return Output::send(self.request.to_bytes(), self.destination);
                        }
                    }
                }
                Output::none()
            }
            TransactionState::Completed => {
                if self.absorb_until.is_some_and(|until| now >= until) {
                    self.state = TransactionState::Terminated;
                }
                Output::none()
            }
            _ => Output::none(),
        }
    }

    fn build_ack(&mut self, response: &Response, output: &mut Output) {
        match ack_for_non_2xx(&self.request, response) {
            Ok(ack) => {
                output.push_send(ack.to_bytes(), self.destination);
                self.ack = Some(ack);
            }
            Err(e) => {
                debug!(key = %self.key, error = %e, "Could not build ACK for final response");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxstack_sip_core::{parse_message, response_for, Message, Method, RequestBuilder, StatusCode};

    fn invite_request() -> Request {
        RequestBuilder::new(Method::Invite, "sip:bob@198.51.100.2")
            .via("198.51.100.1:5060", "udp", "z9hG4bK-ci1")
            .from("sip:alice@198.51.100.1", Some("ft"))
            .to("sip:bob@198.51.100.2", None)
            .call_id("ci-test")
            .cseq(2)
            .build()
    }

    fn dest() -> SocketAddr {
        "198.51.100.2:5060".parse().unwrap()
    }

    fn start_unreliable() -> (ClientInviteTransaction, Output) {
        let request = invite_request();
        let key = TransactionKey::client_for_request(&request).unwrap();
        ClientInviteTransaction::start(key, request, dest(), false, TimerSettings::default(), None)
    }

    #[test]
    fn test_non_2xx_final_triggers_ack() {
        let (mut tx, _) = start_unreliable();
        let response = response_for(tx.request(), StatusCode::BUSY_HERE, Some("tt"));
        let output = tx.on_response(response, dest());

        assert_eq!(tx.state(), TransactionState::Completed);
        assert_eq!(output.sends.len(), 1);
        let Message::Request(ack) = parse_message(&output.sends[0].0).unwrap() else {
            panic!("expected ACK request on the wire");
        };
        assert_eq!(ack.method, Method::Ack);
        assert_eq!(ack.headers.top_via_branch(), Some("z9hG4bK-ci1"));
        assert_eq!(ack.headers.to_tag(), Some("tt"));
        assert!(matches!(
            output.events[..],
            [TransactionEvent::TransactionCompleted { response: Some(_), .. }]
        ));

        // A retransmitted final re-triggers the same ACK, no event.
        let retrans = response_for(tx.request(), StatusCode::BUSY_HERE, Some("tt"));
        let output = tx.on_response(retrans, dest());
        assert_eq!(output.sends.len(), 1);
        assert!(output.events.is_empty());
    }

    #[test]
    fn test_2xx_terminates_immediately() {
        let (mut tx, _) = start_unreliable();
        let response = response_for(tx.request(), StatusCode::OK, Some("tt"));
        let output = tx.on_response(response, dest());
        assert_eq!(tx.state(), TransactionState::Terminated);
        // No ACK from the transaction layer for 2xx.
        assert!(output.sends.is_empty());
    }

    #[test]
    fn test_provisional_stops_timer_a() {
        let (mut tx, _) = start_unreliable();
        let response = response_for(tx.request(), StatusCode::RINGING, Some("tt"));
        tx.on_response(response, dest());
        assert_eq!(tx.state(), TransactionState::Proceeding);
        let output = tx.on_timer(Instant::now() + Duration::from_secs(2));
        assert!(output.sends.is_empty());
    }

    #[test]
    fn test_timer_a_doubles_uncapped() {
        let (mut tx, _) = start_unreliable();
        let t1 = tx.settings.t1;
        let output = tx.on_timer(Instant::now() + t1);
        assert_eq!(output.sends.len(), 1);
        assert_eq!(tx.retransmit_interval, t1 * 2);
        let output = tx.on_timer(Instant::now() + t1 * 4);
        assert_eq!(output.sends.len(), 1);
        assert_eq!(tx.retransmit_interval, t1 * 4);
    }

    #[test]
    fn test_timer_b_fires_with_null_response() {
        let request = invite_request();
        let key = TransactionKey::client_for_request(&request).unwrap();
        let (mut tx, _) = ClientInviteTransaction::start(
            key,
            request,
            dest(),
            false,
            TimerSettings::default(),
            Some(Duration::from_millis(5)),
        );
        let output = tx.on_timer(Instant::now() + Duration::from_millis(10));
        assert_eq!(tx.state(), TransactionState::Terminated);
        assert!(matches!(
            output.events[..],
            [TransactionEvent::TransactionCompleted { response: None, .. }]
        ));
    }
}

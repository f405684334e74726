//! Non-INVITE client transaction (RFC 3261 §17.1.2).
//!
//! Trying -> Proceeding -> Completed -> Terminated. Timer E retransmits the
//! request over unreliable transports with exponential backoff capped at T2
//! (and pinned to T2 once Proceeding); Timer F bounds the wait for a final
//! response; Timer K absorbs response retransmissions after completion.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tracing::trace;

use voxstack_sip_core::{Request, Response};

use crate::events::TransactionEvent;
use crate::key::TransactionKey;
use crate::timer::TimerSettings;
use crate::transaction::{Output, TransactionState};

pub struct ClientNonInviteTransaction {
    key: TransactionKey,
    request: Request,
    destination: SocketAddr,
    reliable: bool,
    settings: TimerSettings,
    state: TransactionState,

    /// Timer E deadline; `None` on reliable transports
    retransmit_at: Option<Instant>,
    retransmit_interval: Duration,
    /// Timer F deadline
    timeout_at: Instant,
    /// Timer K deadline, set on entering Completed
    absorb_until: Option<Instant>,
}

impl ClientNonInviteTransaction {
    /// Create the transaction. The returned output carries the initial
    /// request send; `final_response_timeout` overrides Timer F.
    pub fn start(
        key: TransactionKey,
        request: Request,
        destination: SocketAddr,
        reliable: bool,
        settings: TimerSettings,
        final_response_timeout: Option<Duration>,
    ) -> (Self, Output) {
        let now = Instant::now();
        let timer_f = final_response_timeout.unwrap_or(settings.timer_f);
        let retransmit_at = (!reliable).then(|| now + settings.t1);
        let retransmit_interval = settings.t1;
        let output = Output::send(request.to_bytes(), destination);

        let tx = Self {
            key,
            request,
            destination,
            reliable,
            settings,
            state: TransactionState::Trying,
            retransmit_at,
            retransmit_interval,
            timeout_at: now + timer_f,
            absorb_until: None,
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
            TransactionState::Trying | TransactionState::Proceeding => {
                if response.status.is_provisional() {
                    self.state = TransactionState::Proceeding;
                    // Timer E runs at T2 once a provisional has been seen.
                    self.retransmit_interval = self.settings.t2;
                    Output::event(TransactionEvent::ProvisionalReceived {
                        key: self.key.clone(),
                        response,
                        source,
                    })
                } else {
                    self.complete(Some(response), source)
                }
            }
            // Completed: retransmitted finals are absorbed silently.
            _ => Output::none(),
        }
    }

    pub fn on_timer(&mut self, now: Instant) -> Output {
        match self.state {
            TransactionState::Trying | TransactionState::Proceeding => {
                if now >= self.timeout_at {
                    trace!(key = %self.key, "Timer F fired");
                    return self.complete(None, self.destination);
                }
                if let Some(at) = self.retransmit_at {
                    if now >= at {
                        self.retransmit_interval =
                            (self.retransmit_interval * 2).min(self.settings.t2);
                        self.retransmit_at = Some(now + self.retransmit_interval);
                        return Output::send(self.request.to_bytes(), self.destination);
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

    fn complete(&mut self, response: Option<Response>, source: SocketAddr) -> Output {
        self.retransmit_at = None;
        if response.is_some() && !self.reliable {
            self.state = TransactionState::Completed;
            self.absorb_until = Some(Instant::now() + self.settings.timer_k());
        } else {
            self.state = TransactionState::Terminated;
        }
        Output::event(TransactionEvent::TransactionCompleted {
            key: self.key.clone(),
            request: self.request.clone(),
            response,
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxstack_sip_core::{response_for, Method, RequestBuilder, StatusCode};

    fn options_request() -> Request {
        RequestBuilder::new(Method::Options, "sip:bob@198.51.100.2")
            .via("198.51.100.1:5060", "udp", "z9hG4bK-cni1")
            .from("sip:alice@198.51.100.1", Some("ft"))
            .to("sip:bob@198.51.100.2", None)
            .call_id("cni-test")
            .cseq(1)
            .build()
    }

    fn dest() -> SocketAddr {
        "198.51.100.2:5060".parse().unwrap()
    }

    fn start_unreliable() -> (ClientNonInviteTransaction, Output) {
        let request = options_request();
        let key = TransactionKey::client_for_request(&request).unwrap();
        ClientNonInviteTransaction::start(
            key,
            request,
            dest(),
            false,
            TimerSettings::default(),
            None,
        )
    }

    #[test]
    fn test_start_sends_request() {
        let (tx, output) = start_unreliable();
        assert_eq!(tx.state(), TransactionState::Trying);
        assert_eq!(output.sends.len(), 1);
        assert!(output.sends[0].0.starts_with(b"OPTIONS "));
    }

    #[test]
    fn test_final_response_completes() {
        let (mut tx, _) = start_unreliable();
        let response = response_for(tx.request(), StatusCode::OK, Some("tt"));
        let output = tx.on_response(response, dest());
        assert_eq!(tx.state(), TransactionState::Completed);
        match &output.events[..] {
            [TransactionEvent::TransactionCompleted { response: Some(r), .. }] => {
                assert_eq!(r.status, StatusCode::OK);
            }
            other => panic!("unexpected events {:?}", other),
        }
        // Retransmitted final is absorbed.
        let again = response_for(tx.request(), StatusCode::OK, Some("tt"));
        let output = tx.on_response(again, dest());
        assert!(output.events.is_empty());
    }

    #[test]
    fn test_provisional_moves_to_proceeding() {
        let (mut tx, _) = start_unreliable();
        let response = response_for(tx.request(), StatusCode::TRYING, None);
        let output = tx.on_response(response, dest());
        assert_eq!(tx.state(), TransactionState::Proceeding);
        assert!(matches!(
            output.events[..],
            [TransactionEvent::ProvisionalReceived { .. }]
        ));
    }

    #[test]
    fn test_timer_e_backoff_capped_at_t2() {
        let (mut tx, _) = start_unreliable();
        let t1 = tx.settings.t1;
        let t2 = tx.settings.t2;
        let mut now = Instant::now() + t1;
        let mut interval = t1;
        let mut sent = 0;
        for _ in 0..6 {
            let output = tx.on_timer(now);
            if !output.sends.is_empty() {
                sent += 1;
            }
            interval = (interval * 2).min(t2);
            now += interval;
        }
        assert!(sent >= 4);
        assert_eq!(tx.retransmit_interval, t2);
    }

    #[test]
    fn test_timer_f_timeout_null_response() {
        let request = options_request();
        let key = TransactionKey::client_for_request(&request).unwrap();
        let (mut tx, _) = ClientNonInviteTransaction::start(
            key,
            request,
            dest(),
            false,
            TimerSettings::default(),
            Some(Duration::from_millis(10)),
        );
        let output = tx.on_timer(Instant::now() + Duration::from_millis(20));
        assert_eq!(tx.state(), TransactionState::Terminated);
        assert!(matches!(
            output.events[..],
            [TransactionEvent::TransactionCompleted { response: None, .. }]
        ));
    }

    #[test]
    fn test_reliable_transport_skips_retransmission() {
        let request = options_request();
        let key = TransactionKey::client_for_request(&request).unwrap();
        let (mut tx, _) = ClientNonInviteTransaction::start(
            key,
            request,
            dest(),
            true,
            TimerSettings::default(),
            None,
        );
        let output = tx.on_timer(Instant::now() + Duration::from_secs(2));
        assert!(output.sends.is_empty());
        // Reliable: final response terminates at once, no Timer K linger.
        let response = response_for(tx.request(), StatusCode::OK, Some("tt"));
        tx.on_response(response, dest());
        assert_eq!(tx.state(), TransactionState::Terminated);
    }
}

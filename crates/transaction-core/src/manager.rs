//! Transport dispatcher and transaction table.
//!
//! One dispatcher task per transport: it drains the transport's event
//! channel, parses each message, matches it to a transaction by key, and
//! forwards whatever the machines do not absorb to the TU. The recv wait is
//! bounded by the tick interval so transaction timers make progress even
//! when the wire is quiet.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use voxstack_sip_core::{parse_message, Message, Method, Request, Response};
use voxstack_sip_transport::{Transport, TransportEvent};

use crate::error::{Error, Result};
use crate::events::TransactionEvent;
use crate::key::TransactionKey;
use crate::timer::TimerSettings;
use crate::transaction::{
    ClientInviteTransaction, ClientNonInviteTransaction, Output, ServerInviteTransaction,
    ServerNonInviteTransaction, TransactionMachine,
};

/// Transaction layer entry point: owns the transaction table and the
/// dispatcher task for one transport
#[derive(Clone)]
pub struct TransactionManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    transport: Arc<dyn Transport>,
    transactions: DashMap<TransactionKey, TransactionMachine>,
    events_tx: mpsc::Sender<TransactionEvent>,
    settings: TimerSettings,
    closed: AtomicBool,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl TransactionManager {
    /// Create a manager over `transport`, consuming its event channel.
    ///
    /// Returns the manager and the TU event receiver.
    pub fn new(
        transport: Arc<dyn Transport>,
        transport_rx: mpsc::Receiver<TransportEvent>,
        settings: TimerSettings,
    ) -> (Self, mpsc::Receiver<TransactionEvent>) {
        let (events_tx, events_rx) = mpsc::channel(100);
        let inner = Arc::new(ManagerInner {
            transport,
            transactions: DashMap::new(),
            events_tx,
            settings,
            closed: AtomicBool::new(false),
            dispatcher: Mutex::new(None),
        });

        let worker = inner.clone();
        let handle = tokio::spawn(async move {
            worker.run_dispatcher(transport_rx).await;
        });
        *inner.dispatcher.lock() = Some(handle);

        (Self { inner }, events_rx)
    }

    /// The transport this manager dispatches for
    pub fn transport(&self) -> Arc<dyn Transport> {
        self.inner.transport.clone()
    }

    /// Number of live transactions
    pub fn transaction_count(&self) -> usize {
        self.inner.transactions.len()
    }

    /// Start a client transaction for `request` and send it to
    /// `destination`
    pub async fn send_request(
        &self,
        request: Request,
        destination: SocketAddr,
    ) -> Result<TransactionKey> {
        self.send_request_with_timeout(request, destination, None).await
    }

    /// Start a client transaction with an explicit final-response timeout
    /// (Timer B for INVITE, Timer F otherwise)
    pub async fn send_request_with_timeout(
        &self,
        request: Request,
        destination: SocketAddr,
        final_response_timeout: Option<Duration>,
    ) -> Result<TransactionKey> {
        if self.inner.closed.load(Ordering::Relaxed) {
            return Err(Error::Closed);
        }
        if request.method == Method::Ack {
            return Err(Error::InvalidTransaction(
                "ACK does not start a transaction; use send_ack".into(),
            ));
        }

        let key = TransactionKey::client_for_request(&request)?;
        if self.inner.transactions.contains_key(&key) {
            return Err(Error::DuplicateTransaction(key.to_string()));
        }

        let reliable = self.inner.transport.is_reliable();
        let settings = self.inner.settings.clone();
        let (machine, output) = if request.method == Method::Invite {
            let (tx, out) = ClientInviteTransaction::start(
                key.clone(),
                request,
                destination,
                reliable,
                settings,
                final_response_timeout,
            );
            (TransactionMachine::ClientInvite(tx), out)
        } else {
            let (tx, out) = ClientNonInviteTransaction::start(
                key.clone(),
                request,
                destination,
                reliable,
                settings,
                final_response_timeout,
            );
            (TransactionMachine::ClientNonInvite(tx), out)
        };
        self.inner.transactions.insert(key.clone(), machine);
        self.inner.perform(output).await;
        debug!(%key, %destination, "Client transaction started");
        Ok(key)
    }

    /// Send an ACK outside any transaction (the 2xx ACK the dialog layer
    /// owns)
    pub async fn send_ack(&self, ack: Request, destination: SocketAddr) -> Result<()> {
        if self.inner.closed.load(Ordering::Relaxed) {
            return Err(Error::Closed);
        }
        self.inner.transport.send(ack.to_bytes(), destination).await?;
        Ok(())
    }

    /// Respond to `request` (received from `source`) through a server
    /// transaction, creating it on first use
    pub async fn respond(
        &self,
        request: &Request,
        source: SocketAddr,
        response: Response,
    ) -> Result<TransactionKey> {
        if self.inner.closed.load(Ordering::Relaxed) {
            return Err(Error::Closed);
        }
        let key = TransactionKey::server(request)?;

        // Further response through an existing transaction.
        let existing = {
            match self.inner.transactions.get_mut(&key) {
                Some(mut entry) => {
                    let output = match &mut *entry {
                        TransactionMachine::ServerInvite(tx) => tx.send_response(response.clone()),
                        TransactionMachine::ServerNonInvite(tx) => {
                            tx.send_response(response.clone())
                        }
                        _ => Output::none(),
                    };
                    let terminated = entry.is_terminated();
                    Some((output, terminated))
                }
                None => None,
            }
        };
        if let Some((output, terminated)) = existing {
            if terminated {
                self.inner.transactions.remove(&key);
            }
            self.inner.perform(output).await;
            return Ok(key);
        }

        let reliable = self.inner.transport.is_reliable();
        let settings = self.inner.settings.clone();
        let (machine, output) = if request.method == Method::Invite {
            let (tx, out) = ServerInviteTransaction::start(
                key.clone(),
                request.clone(),
                source,
                response,
                reliable,
                settings,
            );
            (TransactionMachine::ServerInvite(tx), out)
        } else {
            let (tx, out) = ServerNonInviteTransaction::start(
                key.clone(),
                request.clone(),
                source,
                response,
                reliable,
                settings,
            );
            (TransactionMachine::ServerNonInvite(tx), out)
        };
        let terminated = machine.is_terminated();
        if !terminated {
            self.inner.transactions.insert(key.clone(), machine);
        }
        self.inner.perform(output).await;
        debug!(%key, %source, "Server transaction started");
        Ok(key)
    }

    /// Shut the manager down: stops the dispatcher and closes the
    /// transport. Idempotent.
    pub async fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.inner.dispatcher.lock().take() {
            handle.abort();
        }
        self.inner.transactions.clear();
        let _ = self.inner.transport.close().await;
        info!("Transaction manager shut down");
    }
}

impl ManagerInner {
    async fn run_dispatcher(self: &Arc<Self>, mut transport_rx: mpsc::Receiver<TransportEvent>) {
        let tick = self.settings.tick_interval;
        debug!("Transaction dispatcher started");
        loop {
            if self.closed.load(Ordering::Relaxed) {
                break;
            }
            match tokio::time::timeout(tick, transport_rx.recv()).await {
                Ok(Some(event)) => self.handle_transport_event(event).await,
                Ok(None) => {
                    let _ = self.events_tx.send(TransactionEvent::TransportClosed).await;
                    break;
                }
                // Quiet wire: fall through to the timer pass.
                Err(_) => {}
            }
            self.drive_timers().await;
        }
        debug!("Transaction dispatcher terminated");
    }

    async fn handle_transport_event(self: &Arc<Self>, event: TransportEvent) {
        match event {
            TransportEvent::MessageReceived { bytes, source, .. } => {
                self.handle_message(bytes, source).await;
            }
            TransportEvent::ConnectionFailed { destination } => {
                let _ = self
                    .events_tx
                    .send(TransactionEvent::ConnectionFailed { destination })
                    .await;
            }
            TransportEvent::ConnectionClosed { peer } => {
                trace!(%peer, "Peer connection closed");
            }
            TransportEvent::Closed => {
                let _ = self.events_tx.send(TransactionEvent::TransportClosed).await;
            }
        }
    }

    async fn handle_message(self: &Arc<Self>, bytes: Bytes, source: SocketAddr) {
        let message = match parse_message(&bytes) {
            Ok(message) => message,
            Err(e) => {
                // Unparseable traffic is dropped silently.
                trace!(%source, error = %e, "Dropping unparseable message");
                return;
            }
        };

        match message {
            Message::Request(request) => self.dispatch_request(request, source).await,
            Message::Response(response) => self.dispatch_response(response, source).await,
        }
    }

    async fn dispatch_request(self: &Arc<Self>, request: Request, source: SocketAddr) {
        let key = match TransactionKey::server(&request) {
            Ok(key) => key,
            Err(e) => {
                trace!(%source, error = %e, "Request without transaction headers dropped");
                return;
            }
        };

        match self.transactions.get_mut(&key) {
            Some(mut entry) => {
                let output = entry.on_request(request, source);
                let terminated = entry.is_terminated();
                drop(entry);
                if terminated {
                    self.transactions.remove(&key);
                }
                self.perform(output).await;
            }
            None => {
                // New work for the TU; it creates the server transaction by
                // responding. (2xx ACKs also land here, for the dialog
                // layer.)
                let _ = self
                    .events_tx
                    .send(TransactionEvent::RequestReceived { request, source })
                    .await;
            }
        }
    }

    async fn dispatch_response(self: &Arc<Self>, response: Response, source: SocketAddr) {
        let key = match TransactionKey::client(&response) {
            Ok(key) => key,
            Err(e) => {
                trace!(%source, error = %e, "Response without transaction headers dropped");
                return;
            }
        };

        match self.transactions.get_mut(&key) {
            Some(mut entry) => {
                let output = entry.on_response(response, source);
                let terminated = entry.is_terminated();
                drop(entry);
                if terminated {
                    self.transactions.remove(&key);
                }
                self.perform(output).await;
            }
            None => {
                let _ = self
                    .events_tx
                    .send(TransactionEvent::ResponseReceived { response, source })
                    .await;
            }
        }
    }

    /// Run every machine's timer handler; remove the ones that terminated.
    async fn drive_timers(self: &Arc<Self>) {
        let now = Instant::now();
        let keys: Vec<TransactionKey> =
            self.transactions.iter().map(|entry| entry.key().clone()).collect();
        for key in keys {
            let ticked = {
                match self.transactions.get_mut(&key) {
                    Some(mut entry) => {
                        let output = entry.on_timer(now);
                        let terminated = entry.is_terminated();
                        Some((output, terminated))
                    }
                    None => None,
                }
            };
            if let Some((output, terminated)) = ticked {
                if terminated {
                    self.transactions.remove(&key);
                    trace!(%key, "Transaction terminated and removed");
                }
                self.perform(output).await;
            }
        }
    }

    /// Execute a machine transition's side effects: wire sends first, then
    /// TU events. Send failures are tolerated; the machines time out.
    async fn perform(self: &Arc<Self>, output: Output) {
        for (bytes, destination) in output.sends {
            if let Err(e) = self.transport.send(bytes, destination).await {
                warn!(%destination, error = %e, "Transaction send failed; relying on timers");
            }
        }
        for event in output.events {
            let _ = self.events_tx.send(event).await;
        }
    }
}

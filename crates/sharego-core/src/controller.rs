//! Framework-agnostic session façade.
//!
//! Holds at most one live session and a single mutable snapshot of its
//! observable state. Every mutation republishes a cloned snapshot to all
//! subscribers, so frontends only ever render immutable values.

use crate::adapters::{WsClientAdapter, WsServerAdapter};
use crate::config::{PROTOCOL_VERSION, SessionConfig};
use crate::error::SessionError;
use crate::events::{PairingRequest, SessionEvent};
use crate::protocol::QrPayload;
use crate::session::Session;
use crate::state::SessionState;
use crate::transport::Transport;
use crate::types::{Base64PublicKey, NetworkAddress, SequenceNumber, SessionId};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

/// One payload we sent, tracked until the peer acknowledges it.
#[derive(Debug, Clone, PartialEq)]
pub struct SentItem {
    pub seq: SequenceNumber,
    pub text: String,
    pub timestamp_ms: u64,
    pub acked: bool,
}

/// One payload the peer sent us.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedItem {
    pub id: u64,
    pub text: String,
    pub timestamp_ms: u64,
}

/// Immutable view of the controller state, delivered to subscribers.
#[derive(Debug, Clone, Default)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub session_id: Option<SessionId>,
    /// Encoded QR payload JSON, ready to render.
    pub qr_payload: Option<String>,
    pub local_address: Option<NetworkAddress>,
    pub pairing_request: Option<PairingRequest>,
    pub received_items: Vec<ReceivedItem>,
    pub sent_items: Vec<SentItem>,
    pub error: Option<String>,
}

struct Inner {
    session: Option<Session>,
    snapshot: SessionSnapshot,
}

pub struct SessionController {
    inner: Mutex<Inner>,
    listeners: Mutex<Vec<mpsc::UnboundedSender<SessionSnapshot>>>,
    starting: AtomicBool,
    next_item_id: AtomicU64,
}

impl SessionController {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner { session: None, snapshot: SessionSnapshot::default() }),
            listeners: Mutex::new(Vec::new()),
            starting: AtomicBool::new(false),
            next_item_id: AtomicU64::new(1),
        })
    }

    /// Subscribe to snapshot updates. The current snapshot is delivered
    /// immediately.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SessionSnapshot> {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(self.inner.lock().expect("controller lock").snapshot.clone());
        self.listeners.lock().expect("listener lock").push(tx);
        rx
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.lock().expect("controller lock").snapshot.clone()
    }

    /// Start a receiver session: bind the server adapter, then publish the
    /// QR payload once the bound address is known.
    pub async fn start_receiver(
        self: &Arc<Self>,
        server: Box<dyn WsServerAdapter>,
        config: SessionConfig,
    ) -> Result<(), SessionError> {
        if self.starting.swap(true, Ordering::SeqCst) {
            tracing::warn!("session start already in progress; ignoring");
            return Ok(());
        }
        let _reset = StartingReset(&self.starting);

        let session = Session::new_receiver(config.clone());
        let transport = Arc::new(Transport::with_server(server));
        self.install(&session);

        let addr = match session.start_as_receiver(transport, config.port).await {
            Ok(addr) => addr,
            Err(err) => {
                self.fail(&session, &err);
                return Err(err);
            }
        };

        let mut inner = self.inner.lock().expect("controller lock");
        if self.is_current(&inner, &session) {
            if let Some(pk) = session.public_key() {
                let payload = QrPayload {
                    v: PROTOCOL_VERSION,
                    sid: session.id().clone(),
                    addr,
                    pk,
                    exp: config.bootstrap_ttl.as_secs(),
                };
                inner.snapshot.local_address = Some(addr);
                inner.snapshot.qr_payload = Some(payload.encode());
                self.publish(&mut inner);
            }
        }
        Ok(())
    }

    /// Start a sender session toward `addr`. The session id comes from the
    /// QR payload or the typed-in code so the receiver's check passes.
    pub async fn start_sender(
        self: &Arc<Self>,
        client: Box<dyn WsClientAdapter>,
        config: SessionConfig,
        addr: &str,
        session_id: SessionId,
        receiver_pk: Option<Base64PublicKey>,
    ) -> Result<(), SessionError> {
        if self.starting.swap(true, Ordering::SeqCst) {
            tracing::warn!("session start already in progress; ignoring");
            return Ok(());
        }
        let _reset = StartingReset(&self.starting);

        let session = Session::new_sender(config, session_id);
        let transport = Arc::new(Transport::with_client(client));
        self.install(&session);

        if let Err(err) =
            session.start_as_sender(transport, addr, receiver_pk.as_ref()).await
        {
            self.fail(&session, &err);
            return Err(err);
        }
        Ok(())
    }

    pub fn approve(&self) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().expect("controller lock");
        let session = inner.session.as_ref().ok_or(SessionError::NoActiveSession)?;
        session.approve_pairing()?;
        inner.snapshot.pairing_request = None;
        self.publish(&mut inner);
        Ok(())
    }

    pub fn reject(&self, reason: Option<&str>) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().expect("controller lock");
        let session = inner.session.as_ref().ok_or(SessionError::NoActiveSession)?;
        session.reject_pairing(reason)?;
        inner.snapshot.pairing_request = None;
        self.publish(&mut inner);
        Ok(())
    }

    /// Encrypt and send a text payload; it shows up in `sent_items` until
    /// acknowledged.
    pub fn send_data(&self, text: &str) -> Result<SequenceNumber, SessionError> {
        let mut inner = self.inner.lock().expect("controller lock");
        let session = inner.session.as_ref().ok_or(SessionError::NoActiveSession)?;
        let seq = session.send_data(text.as_bytes())?;
        inner.snapshot.sent_items.push(SentItem {
            seq,
            text: text.to_string(),
            timestamp_ms: now_ms(),
            acked: false,
        });
        self.publish(&mut inner);
        Ok(seq)
    }

    /// Close the current session and reset the snapshot. History is
    /// discarded with it.
    pub fn end_session(&self) {
        let mut inner = self.inner.lock().expect("controller lock");
        if let Some(session) = inner.session.take() {
            session.close();
        }
        inner.snapshot = SessionSnapshot::default();
        self.publish(&mut inner);
    }

    /// Tear everything down, subscribers included.
    pub fn destroy(&self) {
        self.end_session();
        self.listeners.lock().expect("listener lock").clear();
    }

    // ── internals ───────────────────────────────────────────────────────

    /// Replace the current session and reset the snapshot for it.
    fn install(self: &Arc<Self>, session: &Session) {
        let mut inner = self.inner.lock().expect("controller lock");
        if let Some(old) = inner.session.take() {
            old.close();
        }
        inner.session = Some(session.clone());
        inner.snapshot = SessionSnapshot {
            session_id: Some(session.id().clone()),
            ..SessionSnapshot::default()
        };
        self.publish(&mut inner);
        drop(inner);
        self.spawn_event_task(session.clone());
    }

    /// Record a start failure if the session is still the current one.
    fn fail(&self, session: &Session, err: &SessionError) {
        session.close();
        let mut inner = self.inner.lock().expect("controller lock");
        if self.is_current(&inner, session) {
            inner.session = None;
            inner.snapshot.error = Some(err.to_string());
            self.publish(&mut inner);
        }
    }

    fn is_current(&self, inner: &Inner, session: &Session) -> bool {
        inner.session.as_ref().map(|s| s.same_session(session)).unwrap_or(false)
    }

    fn spawn_event_task(self: &Arc<Self>, session: Session) {
        let mut events = session.subscribe();
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(controller) = weak.upgrade() else { break };
                controller.apply_event(&session, event);
            }
        });
    }

    fn apply_event(&self, session: &Session, event: SessionEvent) {
        let mut inner = self.inner.lock().expect("controller lock");
        if !self.is_current(&inner, session) {
            return; // superseded session still draining events
        }
        match event {
            SessionEvent::StateChanged(state) => {
                inner.snapshot.state = state;
                if state == SessionState::Rejected && inner.snapshot.error.is_none() {
                    inner.snapshot.error = Some("pairing was declined".to_string());
                }
            }
            SessionEvent::PairingRequest(request) => {
                inner.snapshot.pairing_request = Some(request);
            }
            SessionEvent::DataReceived(bytes) => {
                let id = self.next_item_id.fetch_add(1, Ordering::Relaxed);
                inner.snapshot.received_items.push(ReceivedItem {
                    id,
                    text: String::from_utf8_lossy(&bytes).into_owned(),
                    timestamp_ms: now_ms(),
                });
            }
            SessionEvent::DataAcknowledged(seq) => {
                if let Some(item) =
                    inner.snapshot.sent_items.iter_mut().find(|item| item.seq == seq)
                {
                    item.acked = true;
                }
            }
            SessionEvent::Error(message) => {
                inner.snapshot.error = Some(message);
            }
        }
        self.publish(&mut inner);
    }

    /// Fan the snapshot out. Subscribers that went away are pruned; a
    /// misbehaving subscriber can never break the controller.
    fn publish(&self, inner: &mut MutexGuard<'_, Inner>) {
        let snapshot = inner.snapshot.clone();
        self.listeners.lock().expect("listener lock").retain(|tx| {
            let delivered = tx.send(snapshot.clone()).is_ok();
            if !delivered {
                tracing::debug!("dropping gone snapshot subscriber");
            }
            delivered
        });
    }
}

struct StartingReset<'a>(&'a AtomicBool);

impl Drop for StartingReset<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

//! Role-aware session: handshake orchestration, replay defense, encrypted
//! data transfer, and zeroized teardown.
//!
//! A session owns exactly one keypair and at most one transport. All frame
//! processing happens under one lock in arrival order; the async suspension
//! points (bind, connect, the cleanup timer) re-check for a concurrent
//! close before touching state again.

use crate::config::{SessionConfig, CLOSE_FLUSH_DELAY, MAX_SEQ_GAP, PROTOCOL_VERSION};
use crate::crypto::{
    self, EncryptedEnvelope, KeyPair, SecretBytes, SessionKey, AEAD_TAG_LENGTH, CHALLENGE_LENGTH,
    NONCE_LENGTH, PUBLIC_KEY_LENGTH,
};
use crate::error::{SessionError, TransportError};
use crate::events::{PairingRequest, SessionEvent};
use crate::protocol::{
    classify_frame, decode_control, encode_control, ControlFrame, DataFrame, FrameKind,
    MessageBody,
};
use crate::state::{transition, Role, SessionState};
use crate::transport::{Transport, TransportEvent, TransportState};
use crate::types::{Base64PublicKey, SequenceNumber, SessionId};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::mpsc;

/// Handle to one pairing session. Clones share the same session.
#[derive(Clone)]
pub struct Session {
    shared: Arc<Shared>,
}

struct Shared {
    id: SessionId,
    role: Role,
    config: SessionConfig,
    created: Instant,
    inner: Mutex<Inner>,
    listeners: Mutex<Vec<mpsc::UnboundedSender<SessionEvent>>>,
}

struct Inner {
    state: SessionState,
    keypair: Option<KeyPair>,
    session_key: Option<SessionKey>,
    peer_pk: Option<SecretBytes<PUBLIC_KEY_LENGTH>>,
    challenge: Option<SecretBytes<CHALLENGE_LENGTH>>,
    /// Last outbound sequence number assigned.
    last_seq: u32,
    /// Highest inbound sequence number accepted.
    highest_seen: u32,
    hello_received: bool,
    closing: bool,
    cleaned: bool,
    peer_device_name: Option<String>,
    transport: Option<Arc<Transport>>,
}

impl Session {
    fn new(role: Role, id: SessionId, config: SessionConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                id,
                role,
                config,
                created: Instant::now(),
                inner: Mutex::new(Inner {
                    state: SessionState::Created,
                    keypair: None,
                    session_key: None,
                    peer_pk: None,
                    challenge: None,
                    last_seq: 0,
                    highest_seen: 0,
                    hello_received: false,
                    closing: false,
                    cleaned: false,
                    peer_device_name: None,
                    transport: None,
                }),
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Receiver session with a freshly generated session code.
    pub fn new_receiver(config: SessionConfig) -> Self {
        Self::new(Role::Receiver, crypto::generate_session_id(), config)
    }

    /// Sender session for a known session code (from the QR payload or a
    /// typed-in code).
    pub fn new_sender(config: SessionConfig, id: SessionId) -> Self {
        Self::new(Role::Sender, id, config)
    }

    pub fn id(&self) -> &SessionId {
        &self.shared.id
    }

    pub fn role(&self) -> Role {
        self.shared.role
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    /// Our public key, available once the session has started.
    pub fn public_key(&self) -> Option<Base64PublicKey> {
        self.lock().keypair.as_ref().map(|kp| Base64PublicKey::from_bytes(kp.public_bytes()))
    }

    pub fn is_bootstrap_expired(&self) -> bool {
        self.shared.created.elapsed() > self.shared.config.bootstrap_ttl
    }

    /// Two handles refer to the same session. Used to detect supersession
    /// after an awaited start.
    pub fn same_session(&self, other: &Session) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Subscribe to session events. Dropped receivers are pruned on the
    /// next emission.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SessionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.listeners.lock().expect("listener lock").push(tx);
        rx
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.shared.inner.lock().expect("session lock")
    }

    // ── lifecycle ───────────────────────────────────────────────────────

    /// Bind the transport and wait for a sender.
    pub async fn start_as_receiver(
        &self,
        transport: Arc<Transport>,
        port: u16,
    ) -> Result<crate::types::NetworkAddress, SessionError> {
        if self.shared.role != Role::Receiver {
            return Err(SessionError::WrongRole);
        }
        let events = transport.take_events().ok_or(TransportError::NotBound)?;
        {
            let mut inner = self.lock();
            if inner.state != SessionState::Created {
                return Err(SessionError::InvalidTransition {
                    from: inner.state,
                    to: SessionState::WaitingForSender,
                });
            }
            inner.keypair = Some(crypto::generate_keypair());
            inner.transport = Some(transport.clone());
        }

        let addr = match transport.listen(port).await {
            Ok(addr) => addr,
            Err(err) => {
                self.close();
                return Err(err.into());
            }
        };

        {
            let mut inner = self.lock();
            // A concurrent close may have superseded us during the bind.
            if inner.closing || inner.state.is_terminal() {
                return Err(SessionError::SessionClosed);
            }
            self.advance(&mut inner, SessionState::WaitingForSender)?;
        }
        self.spawn_pump(events);
        Ok(addr)
    }

    /// Connect to a receiver and open the handshake.
    pub async fn start_as_sender(
        &self,
        transport: Arc<Transport>,
        addr: &str,
        receiver_pk: Option<&Base64PublicKey>,
    ) -> Result<(), SessionError> {
        if self.shared.role != Role::Sender {
            return Err(SessionError::WrongRole);
        }
        let events = transport.take_events().ok_or(TransportError::NotBound)?;
        {
            let mut inner = self.lock();
            if inner.state != SessionState::Created {
                return Err(SessionError::InvalidTransition {
                    from: inner.state,
                    to: SessionState::Handshaking,
                });
            }
            if let Some(pk) = receiver_pk {
                inner.peer_pk = Some(decode_public_key(pk)?);
            }
            inner.keypair = Some(crypto::generate_keypair());
            inner.transport = Some(transport.clone());
        }

        if let Err(err) = transport.connect(addr).await {
            self.close();
            return Err(err.into());
        }

        {
            let mut inner = self.lock();
            if inner.closing || inner.state.is_terminal() {
                return Err(SessionError::SessionClosed);
            }
            self.advance(&mut inner, SessionState::Handshaking)?;
            let hello = MessageBody::Hello {
                pk: Base64PublicKey::from_bytes(
                    inner.keypair.as_ref().expect("keypair set at start").public_bytes(),
                ),
                device_name: self.shared.config.device_name.clone(),
            };
            if let Err(err) = self.send_control(&mut inner, hello) {
                self.close_locked(&mut inner);
                return Err(err);
            }
        }
        self.spawn_pump(events);
        Ok(())
    }

    /// Accept the pending pairing request and activate the session.
    pub fn approve_pairing(&self) -> Result<(), SessionError> {
        let mut inner = self.lock();
        if self.shared.role != Role::Receiver {
            return Err(SessionError::WrongRole);
        }
        if inner.state != SessionState::PendingApproval {
            return Err(SessionError::InvalidTransition {
                from: inner.state,
                to: SessionState::Active,
            });
        }
        self.advance(&mut inner, SessionState::Active)?;
        self.send_control(&mut inner, MessageBody::Accept)?;
        Ok(())
    }

    /// Decline the pending pairing request.
    pub fn reject_pairing(&self, reason: Option<&str>) -> Result<(), SessionError> {
        let mut inner = self.lock();
        if self.shared.role != Role::Receiver {
            return Err(SessionError::WrongRole);
        }
        if inner.state != SessionState::PendingApproval {
            return Err(SessionError::InvalidTransition {
                from: inner.state,
                to: SessionState::Rejected,
            });
        }
        // REJECT goes out while the transport is still bound.
        let body = MessageBody::Reject { reason: reason.map(str::to_string) };
        if let Err(err) = self.send_control(&mut inner, body) {
            tracing::warn!("failed to send REJECT: {err}");
        }
        self.advance(&mut inner, SessionState::Rejected)?;
        inner.closing = true;
        self.schedule_cleanup();
        Ok(())
    }

    /// Encrypt and send one payload. Only legal while `Active`; returns the
    /// assigned sequence number.
    pub fn send_data(&self, plaintext: &[u8]) -> Result<SequenceNumber, SessionError> {
        let mut inner = self.lock();
        if inner.state != SessionState::Active {
            return Err(SessionError::NotActive);
        }
        let key = inner.session_key.as_ref().ok_or(SessionError::NotActive)?;
        let envelope = crypto::encrypt(plaintext, key)?;
        let seq = alloc_seq(&mut inner)?;
        let frame =
            DataFrame { seq, nonce: envelope.nonce, ciphertext: envelope.ciphertext };
        let transport = inner.transport.as_ref().ok_or(TransportError::NotBound)?;
        transport.send(frame.encode())?;
        Ok(seq)
    }

    /// Close the session. Idempotent; a connected transport gets a CLOSE
    /// frame and a short flush window before teardown.
    pub fn close(&self) {
        let mut inner = self.lock();
        self.close_locked(&mut inner);
    }

    // ── internals ───────────────────────────────────────────────────────

    fn close_locked(&self, inner: &mut Inner) {
        if inner.closing || inner.state.is_terminal() {
            return;
        }
        inner.closing = true;
        let connected = inner
            .transport
            .as_ref()
            .map(|t| t.state() == TransportState::Connected)
            .unwrap_or(false);
        if connected {
            if let Err(err) = self.send_control(inner, MessageBody::Close) {
                tracing::debug!("failed to send CLOSE: {err}");
            }
            // Transition now so no further frames are processed, but give
            // the CLOSE frame time to flush before the transport goes away.
            self.force_closed(inner);
            self.schedule_cleanup();
        } else {
            self.cleanup_locked(inner);
        }
    }

    fn force_closed(&self, inner: &mut Inner) {
        if inner.state.is_terminal() {
            return;
        }
        if let Err(err) = self.advance(inner, SessionState::Closed) {
            tracing::warn!("close transition failed: {err}");
        }
    }

    /// Zero all secret material, release the transport, drop listeners.
    /// Runs at most once, on every exit path.
    fn cleanup_locked(&self, inner: &mut Inner) {
        if inner.cleaned {
            return;
        }
        inner.cleaned = true;
        inner.closing = true;
        self.force_closed(inner);

        if let Some(kp) = inner.keypair.as_mut() {
            kp.wipe();
        }
        if let Some(key) = inner.session_key.as_mut() {
            key.wipe();
        }
        if let Some(challenge) = inner.challenge.as_mut() {
            challenge.wipe();
        }
        if let Some(pk) = inner.peer_pk.as_mut() {
            pk.wipe();
        }
        if let Some(transport) = inner.transport.take() {
            transport.close();
        }
        self.shared.listeners.lock().expect("listener lock").clear();
        tracing::debug!(session = %self.shared.id, "session cleaned up");
    }

    fn schedule_cleanup(&self) {
        let weak = Arc::downgrade(&self.shared);
        tokio::spawn(async move {
            tokio::time::sleep(CLOSE_FLUSH_DELAY).await;
            if let Some(shared) = weak.upgrade() {
                let session = Session { shared };
                let mut inner = session.lock();
                session.cleanup_locked(&mut inner);
            }
        });
    }

    fn spawn_pump(&self, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
        let weak = Arc::downgrade(&self.shared);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(shared) = weak.upgrade() else { break };
                let session = Session { shared };
                session.handle_transport_event(event);
                if session.lock().cleaned {
                    break;
                }
            }
        });
    }

    fn handle_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => {
                tracing::debug!(session = %self.shared.id, "peer connected");
            }
            TransportEvent::Frame(bytes) => self.handle_frame(&bytes),
            TransportEvent::Disconnected => {
                let mut inner = self.lock();
                if inner.closing
                    || matches!(inner.state, SessionState::Closed | SessionState::Rejected)
                {
                    return;
                }
                self.emit(SessionEvent::Error("transport disconnected".to_string()));
                inner.closing = true;
                self.cleanup_locked(&mut inner);
            }
        }
    }

    fn handle_frame(&self, bytes: &[u8]) {
        let mut inner = self.lock();
        if inner.closing || matches!(inner.state, SessionState::Closed | SessionState::Rejected)
        {
            return;
        }

        // Expiry is checked before any parsing.
        if self.shared.created.elapsed() > self.shared.config.session_ttl {
            self.emit(SessionEvent::Error("session expired".to_string()));
            self.close_locked(&mut inner);
            return;
        }

        match classify_frame(bytes) {
            None => {} // unknown leading byte
            Some(FrameKind::Binary) => match DataFrame::decode(bytes) {
                Err(err) => self.emit(SessionEvent::Error(err.to_string())),
                Ok(frame) => {
                    if self.accept_seq(&mut inner, frame.seq) {
                        self.on_encrypted_payload(
                            &mut inner,
                            frame.seq,
                            frame.nonce,
                            frame.ciphertext,
                        );
                    }
                }
            },
            Some(FrameKind::Json) => match decode_control(bytes) {
                Err(err) => self.emit(SessionEvent::Error(err.to_string())),
                Ok(frame) => {
                    if frame.sid != self.shared.id {
                        return; // not ours
                    }
                    if self.accept_seq(&mut inner, frame.seq) {
                        self.dispatch(&mut inner, frame.seq, frame.body);
                    }
                }
            },
        }
    }

    /// Replay and gap defense. Returns whether the frame may be processed.
    fn accept_seq(&self, inner: &mut Inner, seq: SequenceNumber) -> bool {
        let seq = seq.get();
        if seq <= inner.highest_seen {
            return false; // duplicate or replay
        }
        if seq > inner.highest_seen.saturating_add(MAX_SEQ_GAP) {
            self.emit(SessionEvent::Error("sequence number gap too large".to_string()));
            self.close_locked(inner);
            return false;
        }
        inner.highest_seen = seq;
        true
    }

    fn dispatch(&self, inner: &mut Inner, seq: SequenceNumber, body: MessageBody) {
        match (self.shared.role, body) {
            (Role::Receiver, MessageBody::Hello { pk, device_name }) => {
                self.on_hello(inner, pk, device_name)
            }
            (Role::Receiver, MessageBody::Auth { proof }) => self.on_auth(inner, proof),
            (Role::Sender, MessageBody::Challenge { nonce, pk }) => {
                self.on_challenge(inner, nonce, pk)
            }
            (Role::Sender, MessageBody::Accept) => self.on_accept(inner),
            (Role::Sender, MessageBody::Reject { reason }) => self.on_reject(inner, reason),
            (_, MessageBody::Ack { ack_seq }) => self.on_ack(inner, ack_seq),
            (_, MessageBody::Close) => {
                tracing::debug!(session = %self.shared.id, "peer closed the session");
                self.cleanup_locked(inner);
            }
            (_, MessageBody::Data { nonce, ciphertext }) => {
                // Legacy JSON DATA path.
                let Ok(nonce_bytes) = nonce.decode() else { return };
                let Ok(nonce_arr) = <[u8; NONCE_LENGTH]>::try_from(nonce_bytes) else { return };
                let Ok(ct) = ciphertext.decode() else { return };
                self.on_encrypted_payload(inner, seq, nonce_arr, ct);
            }
            (role, other) => {
                tracing::debug!(?role, "ignoring unexpected {} frame", other.type_name());
            }
        }
    }

    fn on_hello(&self, inner: &mut Inner, pk: Base64PublicKey, device_name: String) {
        if inner.hello_received {
            tracing::debug!(session = %self.shared.id, "duplicate HELLO ignored");
            return;
        }
        inner.hello_received = true;

        if self.is_bootstrap_expired() {
            self.emit(SessionEvent::Error("bootstrap code expired".to_string()));
            self.close_locked(inner);
            return;
        }

        let peer_pk = match decode_public_key(&pk) {
            Ok(pk) => pk,
            Err(err) => {
                self.emit(SessionEvent::Error(err.to_string()));
                self.close_locked(inner);
                return;
            }
        };
        tracing::debug!(
            session = %self.shared.id,
            "HELLO from {:?} (key fingerprint {})",
            device_name,
            hex::encode(&peer_pk.expose()[..4])
        );
        inner.peer_pk = Some(peer_pk);
        inner.peer_device_name = Some(device_name);

        if let Err(err) = self.advance(inner, SessionState::Handshaking) {
            self.emit(SessionEvent::Error(err.to_string()));
            self.close_locked(inner);
            return;
        }

        let challenge = crypto::generate_nonce();
        let body = MessageBody::Challenge {
            nonce: crate::types::Base64Nonce::from_bytes(&challenge),
            pk: Base64PublicKey::from_bytes(
                inner.keypair.as_ref().expect("keypair set at start").public_bytes(),
            ),
        };
        inner.challenge = Some(SecretBytes::new(challenge));
        if let Err(err) = self.send_control(inner, body) {
            self.emit(SessionEvent::Error(err.to_string()));
            self.close_locked(inner);
        }
    }

    fn on_auth(&self, inner: &mut Inner, proof: crate::types::Base64Proof) {
        if inner.state != SessionState::Handshaking {
            return;
        }

        let verified = self.verify_auth_proof(inner, &proof);
        match verified {
            Ok(key) => {
                inner.session_key = Some(key);
                if let Err(err) = self.advance(inner, SessionState::PendingApproval) {
                    self.emit(SessionEvent::Error(err.to_string()));
                    self.close_locked(inner);
                    return;
                }
                let request = PairingRequest {
                    device_name: inner.peer_device_name.clone().unwrap_or_default(),
                    public_key: Base64PublicKey::from_bytes(
                        inner.peer_pk.as_ref().expect("peer pk stored on HELLO").expose(),
                    ),
                };
                self.emit(SessionEvent::PairingRequest(request));
            }
            Err(_) => {
                tracing::warn!(session = %self.shared.id, "sender failed authentication");
                let body =
                    MessageBody::Reject { reason: Some("authentication failed".to_string()) };
                if let Err(err) = self.send_control(inner, body) {
                    tracing::debug!("failed to send REJECT: {err}");
                }
                if let Err(err) = self.advance(inner, SessionState::Rejected) {
                    tracing::warn!("reject transition failed: {err}");
                }
                inner.closing = true;
                self.schedule_cleanup();
            }
        }
    }

    /// Check the sender's proof: `nonce ‖ ciphertext` must decrypt under
    /// the derived key to exactly our challenge.
    fn verify_auth_proof(
        &self,
        inner: &Inner,
        proof: &crate::types::Base64Proof,
    ) -> Result<SessionKey, SessionError> {
        let keypair = inner.keypair.as_ref().ok_or(SessionError::NotActive)?;
        let peer_pk = inner.peer_pk.as_ref().ok_or(SessionError::NotActive)?;
        let challenge = inner.challenge.as_ref().ok_or(SessionError::NotActive)?;

        let key = crypto::derive_shared_key(keypair, peer_pk.expose(), true)?;

        let proof_bytes = proof.decode()?;
        if proof_bytes.len() < NONCE_LENGTH + AEAD_TAG_LENGTH {
            return Err(crate::error::CryptoError::AuthenticationFailed.into());
        }
        let mut nonce = [0u8; NONCE_LENGTH];
        nonce.copy_from_slice(&proof_bytes[..NONCE_LENGTH]);
        let envelope =
            EncryptedEnvelope { nonce, ciphertext: proof_bytes[NONCE_LENGTH..].to_vec() };

        let plaintext = crypto::decrypt(&envelope, &key)?;
        if !crypto::constant_time_equal(&plaintext, challenge.expose()) {
            return Err(crate::error::CryptoError::AuthenticationFailed.into());
        }
        Ok(key)
    }

    fn on_challenge(
        &self,
        inner: &mut Inner,
        nonce: crate::types::Base64Nonce,
        pk: Base64PublicKey,
    ) {
        if inner.state != SessionState::Handshaking {
            return;
        }

        // The receiver key may already be pinned from the QR payload.
        if inner.peer_pk.is_none() {
            match decode_public_key(&pk) {
                Ok(peer_pk) => inner.peer_pk = Some(peer_pk),
                Err(err) => {
                    self.emit(SessionEvent::Error(err.to_string()));
                    self.close_locked(inner);
                    return;
                }
            }
        }

        let result = (|| -> Result<(SessionKey, Vec<u8>), SessionError> {
            let keypair = inner.keypair.as_ref().ok_or(SessionError::NotActive)?;
            let peer_pk = inner.peer_pk.as_ref().ok_or(SessionError::NotActive)?;
            let key = crypto::derive_shared_key(keypair, peer_pk.expose(), false)?;
            let challenge = nonce.decode()?;
            let envelope = crypto::encrypt(&challenge, &key)?;
            let mut proof = Vec::with_capacity(NONCE_LENGTH + envelope.ciphertext.len());
            proof.extend_from_slice(&envelope.nonce);
            proof.extend_from_slice(&envelope.ciphertext);
            Ok((key, proof))
        })();

        match result {
            Ok((key, proof)) => {
                inner.session_key = Some(key);
                let body = MessageBody::Auth {
                    proof: crate::types::Base64Proof::from_bytes(&proof),
                };
                if let Err(err) = self.send_control(inner, body) {
                    self.emit(SessionEvent::Error(err.to_string()));
                    self.close_locked(inner);
                }
            }
            Err(err) => {
                self.emit(SessionEvent::Error(err.to_string()));
                self.close_locked(inner);
            }
        }
    }

    fn on_accept(&self, inner: &mut Inner) {
        if inner.state != SessionState::Handshaking {
            return;
        }
        if let Err(err) = self.advance(inner, SessionState::Active) {
            tracing::warn!("accept transition failed: {err}");
        }
    }

    fn on_reject(&self, inner: &mut Inner, reason: Option<String>) {
        if !matches!(inner.state, SessionState::Handshaking | SessionState::PendingApproval) {
            return;
        }
        let message = reason.unwrap_or_else(|| "pairing rejected".to_string());
        self.emit(SessionEvent::Error(message));
        if let Err(err) = self.advance(inner, SessionState::Rejected) {
            tracing::warn!("reject transition failed: {err}");
        }
        self.cleanup_locked(inner);
    }

    fn on_ack(&self, inner: &mut Inner, ack_seq: SequenceNumber) {
        if inner.state != SessionState::Active {
            return;
        }
        self.emit(SessionEvent::DataAcknowledged(ack_seq));
    }

    /// Decrypt an inbound payload (binary or legacy JSON form), surface it,
    /// and acknowledge.
    fn on_encrypted_payload(
        &self,
        inner: &mut Inner,
        seq: SequenceNumber,
        nonce: [u8; NONCE_LENGTH],
        ciphertext: Vec<u8>,
    ) {
        if inner.state != SessionState::Active {
            return;
        }
        let Some(key) = inner.session_key.as_ref() else { return };
        let envelope = EncryptedEnvelope { nonce, ciphertext };
        match crypto::decrypt(&envelope, key) {
            Err(err) => self.emit(SessionEvent::Error(err.to_string())),
            Ok(plaintext) => {
                self.emit(SessionEvent::DataReceived(plaintext));
                let body = MessageBody::Ack { ack_seq: seq };
                if let Err(err) = self.send_control(inner, body) {
                    self.emit(SessionEvent::Error(err.to_string()));
                }
            }
        }
    }

    fn advance(&self, inner: &mut Inner, next: SessionState) -> Result<(), SessionError> {
        inner.state = transition(inner.state, next)?;
        tracing::debug!(session = %self.shared.id, "state -> {next}");
        self.emit(SessionEvent::StateChanged(next));
        Ok(())
    }

    fn send_control(
        &self,
        inner: &mut Inner,
        body: MessageBody,
    ) -> Result<SequenceNumber, SessionError> {
        let seq = alloc_seq(inner)?;
        let frame =
            ControlFrame { v: PROTOCOL_VERSION, body, sid: self.shared.id.clone(), seq };
        let bytes = encode_control(&frame)?;
        let transport = inner.transport.as_ref().ok_or(TransportError::NotBound)?;
        transport.send(bytes)?;
        Ok(seq)
    }

    fn emit(&self, event: SessionEvent) {
        self.shared
            .listeners
            .lock()
            .expect("listener lock")
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    #[cfg(test)]
    pub(crate) fn secrets_wiped(&self) -> bool {
        let inner = self.lock();
        inner.keypair.as_ref().map_or(true, KeyPair::is_wiped)
            && inner.session_key.as_ref().map_or(true, SecretBytes::is_wiped)
            && inner.challenge.as_ref().map_or(true, SecretBytes::is_wiped)
            && inner.transport.is_none()
    }
}

fn alloc_seq(inner: &mut Inner) -> Result<SequenceNumber, SessionError> {
    // Counter space is 1..2^32-1; hitting the top is an error, not a wrap.
    if inner.last_seq >= u32::MAX - 1 {
        return Err(SessionError::SequenceOverflow);
    }
    inner.last_seq += 1;
    Ok(SequenceNumber::new(inner.last_seq))
}

fn decode_public_key(
    pk: &Base64PublicKey,
) -> Result<SecretBytes<PUBLIC_KEY_LENGTH>, SessionError> {
    let bytes = pk.decode()?;
    let arr: [u8; PUBLIC_KEY_LENGTH] =
        bytes.try_into().map_err(|bytes: Vec<u8>| crate::error::CryptoError::InvalidKeyLength {
            expected: PUBLIC_KEY_LENGTH,
            actual: bytes.len(),
        })?;
    Ok(SecretBytes::new(arr))
}

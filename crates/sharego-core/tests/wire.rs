//! Wire-level receiver tests: frames are crafted by hand and pushed through
//! a raw in-memory peer, so replay, gap, and handshake defenses can be
//! exercised byte by byte.

mod common;

use common::{assert_no_event, wait_for_event, wait_for_state};
use sharego_core::config::{MAX_SEQ_GAP, PROTOCOL_VERSION};
use sharego_core::crypto::{self, KeyPair};
use sharego_core::events::SessionEvent;
use sharego_core::memory::{memory_pair, MemoryClient, RawPeer};
use sharego_core::protocol::{
    decode_control, encode_control, ControlFrame, DataFrame, MessageBody,
};
use sharego_core::session::Session;
use sharego_core::state::SessionState;
use sharego_core::transport::Transport;
use sharego_core::types::{Base64PublicKey, SequenceNumber, SessionId};
use sharego_core::SessionConfig;
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    receiver: Session,
    events: tokio::sync::mpsc::UnboundedReceiver<SessionEvent>,
    peer: RawPeer,
    keypair: KeyPair,
    seq: u32,
    _client: MemoryClient,
}

impl Harness {
    async fn start(config: SessionConfig) -> Self {
        let (server, client) = memory_pair();
        let receiver = Session::new_receiver(config);
        let mut events = receiver.subscribe();
        let transport = Arc::new(Transport::with_server(Box::new(server)));
        receiver.start_as_receiver(transport, 4040).await.unwrap();
        wait_for_state(&mut events, SessionState::WaitingForSender).await;

        let peer = RawPeer::connect(&client).await.unwrap();
        Self {
            receiver,
            events,
            peer,
            keypair: crypto::generate_keypair(),
            seq: 0,
            _client: client,
        }
    }

    fn next_seq(&mut self) -> SequenceNumber {
        self.seq += 1;
        SequenceNumber::new(self.seq)
    }

    fn control(&self, body: MessageBody, seq: SequenceNumber) -> Vec<u8> {
        let frame = ControlFrame {
            v: PROTOCOL_VERSION,
            body,
            sid: self.receiver.id().clone(),
            seq,
        };
        encode_control(&frame).unwrap()
    }

    async fn send_hello(&mut self) {
        let seq = self.next_seq();
        let frame = self.control(
            MessageBody::Hello {
                pk: Base64PublicKey::from_bytes(self.keypair.public_bytes()),
                device_name: "RawSender".to_string(),
            },
            seq,
        );
        self.peer.send(frame).await.unwrap();
    }

    /// Complete HELLO → CHALLENGE → AUTH and return the derived key.
    async fn authenticate(&mut self) -> crypto::SessionKey {
        self.send_hello().await;

        let challenge_frame = self.peer.recv().await.expect("expected CHALLENGE");
        let decoded = decode_control(&challenge_frame).unwrap();
        let MessageBody::Challenge { nonce, pk } = decoded.body else {
            panic!("expected CHALLENGE, got {:?}", decoded.body);
        };

        let receiver_pk = pk.decode().unwrap();
        let key = crypto::derive_shared_key(&self.keypair, &receiver_pk, false).unwrap();
        let challenge = nonce.decode().unwrap();
        let envelope = crypto::encrypt(&challenge, &key).unwrap();
        let mut proof = Vec::new();
        proof.extend_from_slice(&envelope.nonce);
        proof.extend_from_slice(&envelope.ciphertext);

        let seq = self.next_seq();
        let frame = self.control(
            MessageBody::Auth { proof: sharego_core::types::Base64Proof::from_bytes(&proof) },
            seq,
        );
        self.peer.send(frame).await.unwrap();
        wait_for_state(&mut self.events, SessionState::PendingApproval).await;
        key
    }

    fn data_frame(&self, key: &crypto::SessionKey, seq: u32, plaintext: &[u8]) -> Vec<u8> {
        let envelope = crypto::encrypt(plaintext, key).unwrap();
        DataFrame {
            seq: SequenceNumber::new(seq),
            nonce: envelope.nonce,
            ciphertext: envelope.ciphertext,
        }
        .encode()
    }
}

#[tokio::test]
async fn second_hello_is_ignored() {
    let mut harness = Harness::start(SessionConfig::default()).await;
    harness.send_hello().await;

    let first = harness.peer.recv().await.expect("expected CHALLENGE");
    assert!(matches!(
        decode_control(&first).unwrap().body,
        MessageBody::Challenge { .. }
    ));
    assert_eq!(harness.receiver.state(), SessionState::Handshaking);

    // A second HELLO must not restart the handshake or mint a new challenge.
    harness.send_hello().await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(harness.receiver.state(), SessionState::Handshaking);

    let extra = tokio::time::timeout(Duration::from_millis(200), harness.peer.recv()).await;
    assert!(extra.is_err(), "no frame expected after duplicate HELLO");
}

#[tokio::test]
async fn frames_for_other_sessions_are_dropped() {
    let mut harness = Harness::start(SessionConfig::default()).await;

    let frame = ControlFrame {
        v: PROTOCOL_VERSION,
        body: MessageBody::Hello {
            pk: Base64PublicKey::from_bytes(harness.keypair.public_bytes()),
            device_name: "RawSender".to_string(),
        },
        sid: SessionId::parse("ZZZZZZ").unwrap(),
        seq: SequenceNumber::new(1),
    };
    harness.peer.send(encode_control(&frame).unwrap()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(harness.receiver.state(), SessionState::WaitingForSender);
}

#[tokio::test]
async fn unknown_first_byte_is_dropped() {
    let mut harness = Harness::start(SessionConfig::default()).await;
    harness.peer.send(vec![0x7f, 1, 2, 3]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(harness.receiver.state(), SessionState::WaitingForSender);
    // The session is still healthy afterwards.
    harness.send_hello().await;
    assert!(harness.peer.recv().await.is_some());
}

#[tokio::test]
async fn replayed_data_is_not_delivered_twice() {
    let mut harness = Harness::start(SessionConfig::default()).await;
    let key = harness.authenticate().await;
    harness.receiver.approve_pairing().unwrap();
    wait_for_state(&mut harness.events, SessionState::Active).await;
    // Drain the ACCEPT frame.
    let _ = harness.peer.recv().await;

    let frame = harness.data_frame(&key, 3, b"secret");
    harness.peer.send(frame.clone()).await.unwrap();
    let delivered = wait_for_event(&mut harness.events, |event| {
        matches!(event, SessionEvent::DataReceived(_))
    })
    .await;
    assert_eq!(delivered, SessionEvent::DataReceived(b"secret".to_vec()));

    // Byte-identical replay: silently discarded.
    harness.peer.send(frame).await.unwrap();
    assert_no_event(&mut harness.events, Duration::from_millis(300), |event| {
        matches!(event, SessionEvent::DataReceived(_))
    })
    .await;

    // Lower-than-highest seq: also discarded.
    let old = harness.data_frame(&key, 2, b"older");
    harness.peer.send(old).await.unwrap();
    assert_no_event(&mut harness.events, Duration::from_millis(300), |event| {
        matches!(event, SessionEvent::DataReceived(_))
    })
    .await;
}

#[tokio::test]
async fn oversized_sequence_gap_closes_the_session() {
    let mut harness = Harness::start(SessionConfig::default()).await;
    let key = harness.authenticate().await;
    harness.receiver.approve_pairing().unwrap();
    wait_for_state(&mut harness.events, SessionState::Active).await;

    // highest seen is 2 (AUTH); anything past 2 + MAX_SEQ_GAP must kill it.
    let frame = harness.data_frame(&key, 2 + MAX_SEQ_GAP + 1, b"too far");
    harness.peer.send(frame).await.unwrap();

    let error = wait_for_event(&mut harness.events, |event| {
        matches!(event, SessionEvent::Error(_))
    })
    .await;
    assert_eq!(
        error,
        SessionEvent::Error("sequence number gap too large".to_string())
    );
    wait_for_state(&mut harness.events, SessionState::Closed).await;
}

#[tokio::test]
async fn bad_auth_proof_is_rejected() {
    let mut harness = Harness::start(SessionConfig::default()).await;
    harness.send_hello().await;
    let _challenge = harness.peer.recv().await.expect("expected CHALLENGE");

    let seq = harness.next_seq();
    let frame = harness.control(
        MessageBody::Auth {
            proof: sharego_core::types::Base64Proof::from_bytes(&[0u8; 64]),
        },
        seq,
    );
    harness.peer.send(frame).await.unwrap();

    let reject = harness.peer.recv().await.expect("expected REJECT");
    let decoded = decode_control(&reject).unwrap();
    assert_eq!(
        decoded.body,
        MessageBody::Reject { reason: Some("authentication failed".to_string()) }
    );

    wait_for_state(&mut harness.events, SessionState::Rejected).await;
    wait_for_state(&mut harness.events, SessionState::Closed).await;
}

#[tokio::test]
async fn expired_bootstrap_closes_on_hello() {
    let mut config = SessionConfig::default();
    config.bootstrap_ttl = Duration::ZERO;
    let mut harness = Harness::start(config).await;

    harness.send_hello().await;
    let error = wait_for_event(&mut harness.events, |event| {
        matches!(event, SessionEvent::Error(_))
    })
    .await;
    assert_eq!(error, SessionEvent::Error("bootstrap code expired".to_string()));
    wait_for_state(&mut harness.events, SessionState::Closed).await;
}

#[tokio::test]
async fn expired_session_closes_before_parsing() {
    let mut config = SessionConfig::default();
    config.session_ttl = Duration::ZERO;
    let mut harness = Harness::start(config).await;

    harness.send_hello().await;
    let error = wait_for_event(&mut harness.events, |event| {
        matches!(event, SessionEvent::Error(_))
    })
    .await;
    assert_eq!(error, SessionEvent::Error("session expired".to_string()));
    wait_for_state(&mut harness.events, SessionState::Closed).await;
}

#[tokio::test]
async fn legacy_json_data_frames_are_accepted() {
    let mut harness = Harness::start(SessionConfig::default()).await;
    let key = harness.authenticate().await;
    harness.receiver.approve_pairing().unwrap();
    wait_for_state(&mut harness.events, SessionState::Active).await;

    let envelope = crypto::encrypt(b"json data", &key).unwrap();
    let seq = harness.next_seq();
    let frame = harness.control(
        MessageBody::Data {
            nonce: sharego_core::types::Base64Nonce::from_bytes(&envelope.nonce),
            ciphertext: sharego_core::types::Base64Ciphertext::from_bytes(&envelope.ciphertext),
        },
        seq,
    );
    harness.peer.send(frame).await.unwrap();

    let delivered = wait_for_event(&mut harness.events, |event| {
        matches!(event, SessionEvent::DataReceived(_))
    })
    .await;
    assert_eq!(delivered, SessionEvent::DataReceived(b"json data".to_vec()));
}

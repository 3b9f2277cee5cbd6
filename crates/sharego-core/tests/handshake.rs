//! End-to-end handshake scenarios over cross-linked in-memory transports.

mod common;

use common::{assert_no_event, wait_for_event, wait_for_state};
use sharego_core::events::SessionEvent;
use sharego_core::memory::memory_pair;
use sharego_core::session::Session;
use sharego_core::state::SessionState;
use sharego_core::transport::Transport;
use sharego_core::{SessionConfig, SessionError};
use std::sync::Arc;
use std::time::Duration;

struct Pair {
    receiver: Session,
    sender: Session,
    receiver_events: tokio::sync::mpsc::UnboundedReceiver<SessionEvent>,
    sender_events: tokio::sync::mpsc::UnboundedReceiver<SessionEvent>,
}

/// Run both sides to `PendingApproval`.
async fn handshake_to_pending() -> Pair {
    let (server, client) = memory_pair();

    let receiver =
        Session::new_receiver(SessionConfig::default().with_device_name("Receiver"));
    let mut receiver_events = receiver.subscribe();
    let receiver_transport = Arc::new(Transport::with_server(Box::new(server)));
    let addr = receiver.start_as_receiver(receiver_transport, 4040).await.unwrap();
    wait_for_state(&mut receiver_events, SessionState::WaitingForSender).await;

    let sender = Session::new_sender(
        SessionConfig::default().with_device_name("Sender"),
        receiver.id().clone(),
    );
    let mut sender_events = sender.subscribe();
    let sender_transport = Arc::new(Transport::with_client(Box::new(client)));
    sender.start_as_sender(sender_transport, &addr.to_string(), None).await.unwrap();
    wait_for_state(&mut sender_events, SessionState::Handshaking).await;

    wait_for_state(&mut receiver_events, SessionState::PendingApproval).await;
    Pair { receiver, sender, receiver_events, sender_events }
}

#[tokio::test]
async fn happy_path_reaches_active_on_both_sides() {
    let mut pair = handshake_to_pending().await;

    let event = wait_for_event(&mut pair.receiver_events, |event| {
        matches!(event, SessionEvent::PairingRequest(_))
    })
    .await;
    let SessionEvent::PairingRequest(request) = event else { unreachable!() };
    assert_eq!(request.device_name, "Sender");

    pair.receiver.approve_pairing().unwrap();
    wait_for_state(&mut pair.receiver_events, SessionState::Active).await;
    wait_for_state(&mut pair.sender_events, SessionState::Active).await;
}

#[tokio::test]
async fn data_is_delivered_and_acknowledged_once() {
    let mut pair = handshake_to_pending().await;
    pair.receiver.approve_pairing().unwrap();
    wait_for_state(&mut pair.receiver_events, SessionState::Active).await;
    wait_for_state(&mut pair.sender_events, SessionState::Active).await;

    let seq = pair.sender.send_data(b"mypassword123").unwrap();

    let received = wait_for_event(&mut pair.receiver_events, |event| {
        matches!(event, SessionEvent::DataReceived(_))
    })
    .await;
    let SessionEvent::DataReceived(bytes) = received else { unreachable!() };
    assert_eq!(String::from_utf8(bytes).unwrap(), "mypassword123");

    let acked = wait_for_event(&mut pair.sender_events, |event| {
        matches!(event, SessionEvent::DataAcknowledged(_))
    })
    .await;
    assert_eq!(acked, SessionEvent::DataAcknowledged(seq));

    // Exactly one acknowledgement for one payload.
    assert_no_event(&mut pair.sender_events, Duration::from_millis(300), |event| {
        matches!(event, SessionEvent::DataAcknowledged(_))
    })
    .await;
}

#[tokio::test]
async fn data_flows_in_both_directions() {
    let mut pair = handshake_to_pending().await;
    pair.receiver.approve_pairing().unwrap();
    wait_for_state(&mut pair.receiver_events, SessionState::Active).await;
    wait_for_state(&mut pair.sender_events, SessionState::Active).await;

    pair.receiver.send_data(b"reply-otp-714204").unwrap();
    let received = wait_for_event(&mut pair.sender_events, |event| {
        matches!(event, SessionEvent::DataReceived(_))
    })
    .await;
    assert_eq!(received, SessionEvent::DataReceived(b"reply-otp-714204".to_vec()));
}

#[tokio::test]
async fn rejection_closes_both_sides() {
    let mut pair = handshake_to_pending().await;

    pair.receiver.reject_pairing(Some("not allowed")).unwrap();

    wait_for_state(&mut pair.receiver_events, SessionState::Rejected).await;
    wait_for_state(&mut pair.receiver_events, SessionState::Closed).await;

    let error = wait_for_event(&mut pair.sender_events, |event| {
        matches!(event, SessionEvent::Error(_))
    })
    .await;
    assert_eq!(error, SessionEvent::Error("not allowed".to_string()));
    wait_for_state(&mut pair.sender_events, SessionState::Rejected).await;
    wait_for_state(&mut pair.sender_events, SessionState::Closed).await;

    // Nothing is processed after teardown.
    assert_eq!(pair.sender.send_data(b"late").unwrap_err(), SessionError::NotActive);
    assert_eq!(pair.receiver.state(), SessionState::Closed);
}

#[tokio::test]
async fn close_propagates_to_the_peer() {
    let mut pair = handshake_to_pending().await;
    pair.receiver.approve_pairing().unwrap();
    wait_for_state(&mut pair.sender_events, SessionState::Active).await;

    pair.sender.close();
    wait_for_state(&mut pair.sender_events, SessionState::Closed).await;
    wait_for_state(&mut pair.receiver_events, SessionState::Closed).await;
}

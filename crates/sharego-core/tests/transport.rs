//! Transport lifecycle tests over the in-memory adapters.

use sharego_core::config::MAX_MESSAGE_SIZE;
use sharego_core::error::TransportError;
use sharego_core::memory::{memory_pair, RawPeer};
use sharego_core::transport::{Transport, TransportEvent, TransportState};
use std::time::Duration;

async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn connect_rejects_invalid_addresses() {
    for bad in ["999.1.1.1:4040", "10.0.0.1", "10.0.0.1:0", "nope"] {
        let (_server, client) = memory_pair();
        let transport = Transport::with_client(Box::new(client));
        let err = transport.connect(bad).await.unwrap_err();
        assert!(
            matches!(err, TransportError::InvalidAddress(_)),
            "expected InvalidAddress for {bad:?}, got {err:?}"
        );
    }
}

#[tokio::test]
async fn oversized_outbound_frames_are_refused() {
    let (server, client) = memory_pair();
    let listener = Transport::with_server(Box::new(server));
    listener.listen(4040).await.unwrap();

    let dialer = Transport::with_client(Box::new(client));
    dialer.connect("127.0.0.1:4040").await.unwrap();
    settle().await;

    let err = dialer.send(vec![0u8; MAX_MESSAGE_SIZE + 1]).unwrap_err();
    assert_eq!(
        err,
        TransportError::MessageTooLarge { size: MAX_MESSAGE_SIZE + 1, limit: MAX_MESSAGE_SIZE }
    );

    // At the limit it still goes through.
    dialer.send(vec![0u8; MAX_MESSAGE_SIZE]).unwrap();
}

#[tokio::test]
async fn send_without_peer_fails() {
    let (server, _client) = memory_pair();
    let transport = Transport::with_server(Box::new(server));
    transport.listen(4040).await.unwrap();
    assert_eq!(transport.send(vec![1]).unwrap_err(), TransportError::NotBound);
}

#[tokio::test]
async fn silent_probe_returns_to_listening() {
    let (server, client) = memory_pair();
    let listener = Transport::with_server(Box::new(server));
    listener.listen(4040).await.unwrap();
    assert_eq!(listener.state(), TransportState::Listening);

    // A probe connects and closes without sending anything.
    let probe = RawPeer::connect(&client).await.unwrap();
    settle().await;
    assert_eq!(listener.state(), TransportState::Connected);
    probe.close().await;
    settle().await;
    assert_eq!(listener.state(), TransportState::Listening);

    // A real peer afterwards connects and delivers frames.
    let peer = RawPeer::connect(&client).await.unwrap();
    peer.send(b"{\"hello\":true}".to_vec()).await.unwrap();
    settle().await;
    assert_eq!(listener.state(), TransportState::Connected);
}

#[tokio::test]
async fn peer_disconnect_after_traffic_is_reported() {
    let (server, client) = memory_pair();
    let listener = Transport::with_server(Box::new(server));
    let mut events = listener.take_events().unwrap();
    listener.listen(4040).await.unwrap();

    let peer = RawPeer::connect(&client).await.unwrap();
    peer.send(b"{}".to_vec()).await.unwrap();
    peer.close().await;

    let mut saw_frame = false;
    let mut saw_disconnect = false;
    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_secs(1), events.recv()).await
    {
        match event {
            TransportEvent::Frame(frame) => {
                assert_eq!(frame, b"{}");
                saw_frame = true;
            }
            TransportEvent::Disconnected => {
                saw_disconnect = true;
                break;
            }
            TransportEvent::Connected => {}
        }
    }
    assert!(saw_frame && saw_disconnect);
    assert_eq!(listener.state(), TransportState::Disconnected);
}

#[tokio::test]
async fn close_is_terminal() {
    let (server, client) = memory_pair();
    let listener = Transport::with_server(Box::new(server));
    listener.listen(4040).await.unwrap();

    let peer = RawPeer::connect(&client).await.unwrap();
    settle().await;

    listener.close();
    assert_eq!(listener.state(), TransportState::Closed);
    // The peer side observes the close.
    assert!(peer.recv().await.is_none());
    // Idempotent.
    listener.close();
    assert_eq!(listener.state(), TransportState::Closed);
}

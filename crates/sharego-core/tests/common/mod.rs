//! Shared helpers for the integration tests.

use sharego_core::events::SessionEvent;
use sharego_core::state::SessionState;
use std::time::Duration;
use tokio::sync::mpsc;

pub const WAIT: Duration = Duration::from_secs(2);

/// Drain events until the wanted state change arrives.
pub async fn wait_for_state(
    events: &mut mpsc::UnboundedReceiver<SessionEvent>,
    want: SessionState,
) {
    let result = tokio::time::timeout(WAIT, async {
        loop {
            match events.recv().await {
                Some(SessionEvent::StateChanged(state)) if state == want => break,
                Some(_) => {}
                None => panic!("event stream ended while waiting for {want}"),
            }
        }
    })
    .await;
    result.unwrap_or_else(|_| panic!("timed out waiting for state {want}"));
}

/// Drain events until one matches the predicate; returns it.
pub async fn wait_for_event(
    events: &mut mpsc::UnboundedReceiver<SessionEvent>,
    mut predicate: impl FnMut(&SessionEvent) -> bool,
) -> SessionEvent {
    tokio::time::timeout(WAIT, async {
        loop {
            match events.recv().await {
                Some(event) if predicate(&event) => break event,
                Some(_) => {}
                None => panic!("event stream ended"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Assert that no event matching the predicate arrives within a window.
pub async fn assert_no_event(
    events: &mut mpsc::UnboundedReceiver<SessionEvent>,
    window: Duration,
    mut predicate: impl FnMut(&SessionEvent) -> bool,
) {
    let result = tokio::time::timeout(window, async {
        loop {
            match events.recv().await {
                Some(event) if predicate(&event) => break event,
                Some(_) => {}
                None => {
                    std::future::pending::<SessionEvent>().await;
                }
            }
        }
    })
    .await;
    if let Ok(event) = result {
        panic!("unexpected event arrived: {event:?}");
    }
}

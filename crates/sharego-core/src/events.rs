//! Typed session events delivered to subscribers over channels.

use crate::state::SessionState;
use crate::types::{Base64PublicKey, SequenceNumber};

/// Shown to the receiver's user while a sender waits in `PendingApproval`.
#[derive(Debug, Clone, PartialEq)]
pub struct PairingRequest {
    pub device_name: String,
    pub public_key: Base64PublicKey,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Fired after every state-machine advance.
    StateChanged(SessionState),
    /// Receiver only: a sender authenticated and awaits approval.
    PairingRequest(PairingRequest),
    /// Decrypted payload from the peer.
    DataReceived(Vec<u8>),
    /// The peer acknowledged one of our DATA frames.
    DataAcknowledged(SequenceNumber),
    /// Wire-level or transport failure, human readable.
    Error(String),
}

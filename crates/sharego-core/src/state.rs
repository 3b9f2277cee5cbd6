//! Session lifecycle states and the central transition table.

use crate::error::SessionError;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Sender,
    Receiver,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SessionState {
    #[default]
    Created,
    WaitingForSender,
    Handshaking,
    PendingApproval,
    Active,
    Rejected,
    Closed,
}

impl SessionState {
    /// `Closed` is the only terminal state; nothing leaves it.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed)
    }

    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Created, WaitingForSender)
                | (Created, Handshaking)
                | (Created, Closed)
                | (WaitingForSender, Handshaking)
                | (WaitingForSender, Closed)
                | (Handshaking, PendingApproval)
                | (Handshaking, Active)
                | (Handshaking, Rejected)
                | (Handshaking, Closed)
                | (PendingApproval, Active)
                | (PendingApproval, Rejected)
                | (PendingApproval, Closed)
                | (Active, Closed)
                | (Rejected, Closed)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Created => "created",
            SessionState::WaitingForSender => "waiting-for-sender",
            SessionState::Handshaking => "handshaking",
            SessionState::PendingApproval => "pending-approval",
            SessionState::Active => "active",
            SessionState::Rejected => "rejected",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Validate one step of the lifecycle.
pub fn transition(from: SessionState, to: SessionState) -> Result<SessionState, SessionError> {
    if from.can_transition_to(to) {
        Ok(to)
    } else {
        Err(SessionError::InvalidTransition { from, to })
    }
}

//! Timing, sizing, and wire constants shared by every component, plus the
//! per-session configuration struct.
//!
//! The constants here are the single source of truth; `SessionConfig`
//! defaults read from them rather than carrying their own values.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Wire protocol version carried in every control frame and QR payload.
pub const PROTOCOL_VERSION: u8 = 1;

/// How long a QR payload / session code stays valid before it has to be
/// regenerated.
pub const BOOTSTRAP_TTL: Duration = Duration::from_secs(10);

/// Maximum lifetime of a session, handshake included.
pub const SESSION_TTL: Duration = Duration::from_secs(300);

/// Default TCP port the receiver listens on.
pub const DEFAULT_PORT: u16 = 4040;

/// Length of the visible session code shown under the QR.
pub const SESSION_CODE_LENGTH: usize = 6;

/// Pause before a replacement QR payload is generated after the old one
/// expires.
pub const REGENERATION_DELAY_MS: u64 = 300;

/// How long copy-to-clipboard feedback stays visible in a frontend.
pub const COPY_FEEDBACK_MS: u64 = 2000;

/// Connect deadline for the client socket adapter.
pub const WS_CONNECT_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Per-host deadline during the subnet probe fallback.
pub const DISCOVERY_HOST_TIMEOUT: Duration = Duration::from_millis(1500);

/// How long to wait for an mDNS answer before falling back to the probe.
pub const MDNS_BROWSE_TIMEOUT: Duration = Duration::from_millis(5000);

/// Concurrent probe connections during the /24 subnet scan.
pub const SUBNET_SCAN_CONCURRENCY: usize = 20;

/// Per-frame size cap in both directions.
pub const MAX_MESSAGE_SIZE: usize = 65536;

/// Largest tolerated jump between consecutive inbound sequence numbers.
pub const MAX_SEQ_GAP: u32 = 1024;

/// Grace period that lets a final CLOSE or REJECT frame flush before the
/// transport is torn down.
pub const CLOSE_FLUSH_DELAY: Duration = Duration::from_millis(200);

/// mDNS service type receivers advertise under.
pub const SERVICE_TYPE: &str = "_sharego._tcp.local.";

/// Rebind attempts after a quick restart leaves a lingering socket.
pub const REBIND_ATTEMPTS: u32 = 5;
pub const REBIND_DELAY: Duration = Duration::from_millis(200);

/// Per-session knobs. Defaults mirror the module constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Name shown to the peer during pairing.
    pub device_name: String,

    /// Port the receiver binds (senders ignore this).
    pub port: u16,

    /// QR / session-code validity window.
    pub bootstrap_ttl: Duration,

    /// Maximum session lifetime.
    pub session_ttl: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            device_name: "ShareGo".to_string(),
            port: DEFAULT_PORT,
            bootstrap_ttl: BOOTSTRAP_TTL,
            session_ttl: SESSION_TTL,
        }
    }
}

impl SessionConfig {
    pub fn with_device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = name.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}

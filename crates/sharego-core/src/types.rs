//! Branded identifier types.
//!
//! Wire-visible strings each get their own newtype so a session id cannot be
//! passed where a base64 public key is expected. The base64 family shares one
//! phantom-typed wrapper; the marker types never exist at runtime.

use crate::config::SESSION_CODE_LENGTH;
use crate::error::TransportError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Symbols allowed in a session code. 0/O and 1/I are excluded so codes
/// survive being read aloud or retyped.
pub const SESSION_ID_ALPHABET: &[u8; 32] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Six-character pairing code identifying one session.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Validate a user-typed code. Lowercase input is accepted and folded.
    pub fn parse(input: &str) -> Result<Self, InvalidSessionId> {
        let code = input.trim().to_ascii_uppercase();
        if code.len() != SESSION_CODE_LENGTH {
            return Err(InvalidSessionId);
        }
        if !code.bytes().all(|b| SESSION_ID_ALPHABET.contains(&b)) {
            return Err(InvalidSessionId);
        }
        Ok(Self(code))
    }

    /// Wrap a wire value without validating it. A sid that does not match
    /// ours is discarded during frame handling, so strictness here would
    /// only turn silent drops into decode errors.
    pub(crate) fn new_unchecked(value: String) -> Self {
        Self(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid session code")]
pub struct InvalidSessionId;

/// `ipv4:port` peer address. Parsing is strict: four octets, no leading
/// zeros, port 1-65535. A `ws://` prefix is tolerated and stripped.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NetworkAddress {
    ip: Ipv4Addr,
    port: u16,
}

impl NetworkAddress {
    pub fn new(ip: Ipv4Addr, port: u16) -> Self {
        Self { ip, port }
    }

    pub fn ip(&self) -> Ipv4Addr {
        self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl FromStr for NetworkAddress {
    type Err = TransportError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let bad = || TransportError::InvalidAddress(input.to_string());
        let trimmed = input.strip_prefix("ws://").unwrap_or(input);
        let (host, port_str) = trimmed.split_once(':').ok_or_else(bad)?;

        let octets: Vec<&str> = host.split('.').collect();
        if octets.len() != 4 {
            return Err(bad());
        }
        let mut ip = [0u8; 4];
        for (slot, octet) in ip.iter_mut().zip(&octets) {
            *slot = parse_decimal(octet).and_then(|v| u8::try_from(v).ok()).ok_or_else(bad)?;
        }

        let port = parse_decimal(port_str)
            .and_then(|v| u16::try_from(v).ok())
            .filter(|&p| p > 0)
            .ok_or_else(bad)?;

        Ok(Self { ip: Ipv4Addr::from(ip), port })
    }
}

/// Digits only, no sign, no leading zeros.
fn parse_decimal(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if s.len() > 1 && s.starts_with('0') {
        return None;
    }
    s.parse().ok()
}

impl fmt::Display for NetworkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

impl fmt::Debug for NetworkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl Serialize for NetworkAddress {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NetworkAddress {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Outbound/inbound frame counter. Assigned values live in `1..2^32-1`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SequenceNumber(u32);

impl SequenceNumber {
    pub fn new(value: u32) -> Self {
        Self(value)
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Debug for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// URL-safe unpadded base64 string carrying bytes of kind `M`.
///
/// The marker is phantom; on the wire this is a plain JSON string.
#[derive(Serialize, Deserialize)]
#[serde(transparent, bound = "")]
pub struct Encoded<M> {
    value: String,
    #[serde(skip)]
    _mark: PhantomData<fn() -> M>,
}

pub enum PublicKeyMark {}
pub enum NonceMark {}
pub enum CiphertextMark {}
pub enum ProofMark {}

pub type Base64PublicKey = Encoded<PublicKeyMark>;
pub type Base64Nonce = Encoded<NonceMark>;
pub type Base64Ciphertext = Encoded<CiphertextMark>;
pub type Base64Proof = Encoded<ProofMark>;

impl<M> Encoded<M> {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self { value: crate::crypto::to_base64(bytes), _mark: PhantomData }
    }

    /// Wrap an already-encoded wire value.
    pub fn from_encoded(value: impl Into<String>) -> Self {
        Self { value: value.into(), _mark: PhantomData }
    }

    pub fn decode(&self) -> Result<Vec<u8>, crate::error::CryptoError> {
        crate::crypto::from_base64(&self.value)
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }
}

impl<M> Clone for Encoded<M> {
    fn clone(&self) -> Self {
        Self { value: self.value.clone(), _mark: PhantomData }
    }
}

impl<M> PartialEq for Encoded<M> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<M> Eq for Encoded<M> {}

impl<M> fmt::Display for Encoded<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

impl<M> fmt::Debug for Encoded<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.value)
    }
}

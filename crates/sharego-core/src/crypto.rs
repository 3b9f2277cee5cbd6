//! Cryptographic primitives.
//!
//! - Ephemeral X25519 keypairs, one per session.
//! - Session key derivation: X25519 DH, then BLAKE2b-512 over
//!   `shared ‖ client_pk ‖ server_pk` (client = sender, server = receiver).
//!   Both ends take bytes 32..64 of the digest so they hold the same
//!   symmetric key; this selection is fixed by cross-platform test vectors.
//! - XChaCha20-Poly1305 AEAD with a fresh random 24-byte nonce per frame.
//! - Base64 is URL-safe and unpadded everywhere.

use crate::config::SESSION_CODE_LENGTH;
use crate::error::CryptoError;
use crate::types::{SessionId, SESSION_ID_ALPHABET};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use blake2::{Blake2b512, Digest};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use rand_core::{OsRng, RngCore};
use subtle::ConstantTimeEq;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

pub const PUBLIC_KEY_LENGTH: usize = 32;
pub const KEY_LENGTH: usize = 32;
pub const NONCE_LENGTH: usize = 24;
pub const AEAD_TAG_LENGTH: usize = 16;
/// Length of the receiver's authentication challenge.
pub const CHALLENGE_LENGTH: usize = 32;

/// Fixed-size secret buffer, wiped on drop and wipeable in place so a
/// teardown path can zero it while handles still exist.
pub struct SecretBytes<const N: usize>([u8; N]);

impl<const N: usize> SecretBytes<N> {
    pub fn new(bytes: [u8; N]) -> Self {
        Self(bytes)
    }

    pub fn expose(&self) -> &[u8; N] {
        &self.0
    }

    pub fn wipe(&mut self) {
        self.0.zeroize();
    }

    pub fn is_wiped(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }
}

impl<const N: usize> Drop for SecretBytes<N> {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl<const N: usize> std::fmt::Debug for SecretBytes<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretBytes(REDACTED)")
    }
}

/// 32-byte symmetric session key.
pub type SessionKey = SecretBytes<KEY_LENGTH>;

/// Ephemeral X25519 keypair. The secret half never leaves this struct.
pub struct KeyPair {
    public: [u8; PUBLIC_KEY_LENGTH],
    secret: SecretBytes<KEY_LENGTH>,
}

impl KeyPair {
    pub fn public_bytes(&self) -> &[u8; PUBLIC_KEY_LENGTH] {
        &self.public
    }

    pub fn wipe(&mut self) {
        self.secret.wipe();
    }

    pub fn is_wiped(&self) -> bool {
        self.secret.is_wiped()
    }

    #[cfg(test)]
    pub(crate) fn from_secret_bytes(secret: [u8; KEY_LENGTH]) -> Self {
        let secret = StaticSecret::from(secret);
        let public = PublicKey::from(&secret);
        Self { public: public.to_bytes(), secret: SecretBytes::new(secret.to_bytes()) }
    }
}

/// Fresh X25519 keypair. Never reused across sessions.
pub fn generate_keypair() -> KeyPair {
    let secret = StaticSecret::random_from_rng(OsRng);
    let public = PublicKey::from(&secret);
    KeyPair { public: public.to_bytes(), secret: SecretBytes::new(secret.to_bytes()) }
}

/// Derive the shared session key from our keypair and the peer's public key.
///
/// `is_receiver` fixes which side of the transcript each key occupies; the
/// sender is the client, the receiver the server.
pub fn derive_shared_key(
    ours: &KeyPair,
    their_pk: &[u8],
    is_receiver: bool,
) -> Result<SessionKey, CryptoError> {
    let their: [u8; PUBLIC_KEY_LENGTH] =
        their_pk.try_into().map_err(|_| CryptoError::InvalidKeyLength {
            expected: PUBLIC_KEY_LENGTH,
            actual: their_pk.len(),
        })?;

    let secret = StaticSecret::from(*ours.secret.expose());
    let shared = secret.diffie_hellman(&PublicKey::from(their));

    let (client_pk, server_pk) = if is_receiver {
        (&their, ours.public_bytes())
    } else {
        (ours.public_bytes(), &their)
    };

    let mut hasher = Blake2b512::new();
    hasher.update(shared.as_bytes());
    hasher.update(client_pk);
    hasher.update(server_pk);
    let digest = hasher.finalize();

    let mut key = [0u8; KEY_LENGTH];
    key.copy_from_slice(&digest[KEY_LENGTH..]);
    Ok(SecretBytes::new(key))
}

/// Random-nonce AEAD output. Ciphertext is plaintext length + 16-byte tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedEnvelope {
    pub nonce: [u8; NONCE_LENGTH],
    pub ciphertext: Vec<u8>,
}

pub fn encrypt(plaintext: &[u8], key: &SessionKey) -> Result<EncryptedEnvelope, CryptoError> {
    let aead = XChaCha20Poly1305::new(key.expose().into());
    let mut nonce = [0u8; NONCE_LENGTH];
    OsRng.fill_bytes(&mut nonce);
    let ciphertext = aead
        .encrypt(XNonce::from_slice(&nonce), plaintext)
        .map_err(|_| CryptoError::AuthenticationFailed)?;
    Ok(EncryptedEnvelope { nonce, ciphertext })
}

pub fn decrypt(envelope: &EncryptedEnvelope, key: &SessionKey) -> Result<Vec<u8>, CryptoError> {
    if envelope.ciphertext.len() < AEAD_TAG_LENGTH {
        return Err(CryptoError::AuthenticationFailed);
    }
    let aead = XChaCha20Poly1305::new(key.expose().into());
    aead.decrypt(XNonce::from_slice(&envelope.nonce), envelope.ciphertext.as_slice())
        .map_err(|_| CryptoError::AuthenticationFailed)
}

/// Uniform 6-character session code. The alphabet has 32 symbols, which
/// divides the u32 range evenly, so the modulo stays unbiased.
pub fn generate_session_id() -> SessionId {
    let mut code = String::with_capacity(SESSION_CODE_LENGTH);
    for _ in 0..SESSION_CODE_LENGTH {
        let idx = (OsRng.next_u32() % SESSION_ID_ALPHABET.len() as u32) as usize;
        code.push(SESSION_ID_ALPHABET[idx] as char);
    }
    SessionId::new_unchecked(code)
}

/// Random 32-byte authentication challenge.
pub fn generate_nonce() -> [u8; CHALLENGE_LENGTH] {
    let mut nonce = [0u8; CHALLENGE_LENGTH];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Compare without early exit. Runs over `max(len)` bytes and mixes a
/// length mismatch into the verdict.
pub fn constant_time_equal(a: &[u8], b: &[u8]) -> bool {
    let mut acc = (a.len() as u64).ct_eq(&(b.len() as u64));
    for i in 0..a.len().max(b.len()) {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        acc &= x.ct_eq(&y);
    }
    acc.into()
}

/// Best-effort overwrite of sensitive buffers.
pub fn zero_memory(bufs: &mut [&mut [u8]]) {
    for buf in bufs.iter_mut() {
        buf.zeroize();
    }
}

pub fn to_base64(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn from_base64(value: &str) -> Result<Vec<u8>, CryptoError> {
    URL_SAFE_NO_PAD.decode(value).map_err(|_| CryptoError::InvalidEncoding)
}

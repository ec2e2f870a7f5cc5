//! Encrypted transport for protocol payloads
//!
//! Every payload crossing the relay is framed twice:
//! `base64(nonce || AES-256-GCM(base64(bytes)))`. The inner base64 layer is
//! what the engine counterpart expects to find after decryption, and the
//! outer one keeps the relay body text-safe.

use crate::{Error, Result};
use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use md5::{Digest, Md5};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// AES-GCM nonce length
pub const NONCE_LEN: usize = 12;

/// AES-GCM authentication tag length
const TAG_LEN: usize = 16;

/// Per-session 256-bit symmetric key
///
/// Generated fresh for every session and never persisted.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey([u8; 32]);

impl EncryptionKey {
    /// Generate a fresh random key
    pub fn generate() -> Self {
        Self(rand::random())
    }

    /// Parse a hex-encoded key (64 hex chars)
    pub fn from_hex(hex_key: &str) -> Result<Self> {
        let bytes = hex::decode(hex_key)
            .map_err(|e| Error::InvalidInput(format!("encryption key: {}", e)))?;
        let key: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            Error::InvalidInput(format!("encryption key must be 32 bytes, got {}", bytes.len()))
        })?;
        Ok(Self(key))
    }

    /// Hex form shared with the remote party in its join request
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey([REDACTED])")
    }
}

/// Base64 framing applied before encryption
pub fn frame(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Content hash of a framed body, used as the relay message hash
pub fn body_hash(framed: &str) -> String {
    hex::encode(Md5::digest(framed.as_bytes()))
}

/// Symmetric encryption of relay payloads
#[derive(Clone)]
pub struct EncryptedTransport {
    cipher: Aes256Gcm,
}

impl EncryptedTransport {
    /// Create a transport for the given session key
    pub fn new(key: &EncryptionKey) -> Result<Self> {
        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| Error::Transport(format!("invalid key: {}", e)))?;
        Ok(Self { cipher })
    }

    /// Create a transport from a hex-encoded session key
    pub fn from_hex(hex_key: &str) -> Result<Self> {
        Self::new(&EncryptionKey::from_hex(hex_key)?)
    }

    /// Encrypt text, returning `base64(nonce || ciphertext)`
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let nonce_bytes: [u8; NONCE_LEN] = rand::random();
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| Error::Transport(format!("encrypt: {}", e)))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(sealed))
    }

    /// Reverse of [`encrypt`](Self::encrypt)
    pub fn decrypt(&self, ciphertext: &str) -> Result<String> {
        let sealed = STANDARD
            .decode(ciphertext)
            .map_err(|e| Error::Transport(format!("outer framing: {}", e)))?;
        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(Error::Transport(format!(
                "ciphertext too short: {} bytes",
                sealed.len()
            )));
        }

        let (nonce_bytes, body) = sealed.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), body)
            .map_err(|_| Error::Transport("authentication failed".into()))?;

        String::from_utf8(plaintext).map_err(|e| Error::Transport(format!("utf-8: {}", e)))
    }

    /// Frame and encrypt opaque engine bytes
    pub fn seal(&self, payload: &[u8]) -> Result<String> {
        self.encrypt(&frame(payload))
    }

    /// Decrypt and unframe a relay body back to engine bytes
    pub fn open(&self, body: &str) -> Result<Vec<u8>> {
        let framed = self.decrypt(body)?;
        STANDARD
            .decode(framed.as_bytes())
            .map_err(|e| Error::Transport(format!("inner framing: {}", e)))
    }
}

impl fmt::Debug for EncryptedTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedTransport").finish_non_exhaustive()
    }
}

//! Core types shared by the driver and the orchestrators
//!
//! Party and session identifiers are opaque strings handed out by the relay
//! and by the caller. Key shares are opaque engine blobs carried in base64.

use crate::{Error, Result};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use k256::ecdsa;
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a party in a relay session
pub type PartyId = String;

/// Identifier of a relay session
pub type SessionId = String;

/// Message tag of the EdDSA channel on a shared session
pub const EDDSA_MESSAGE_TAG: &str = "eddsa";

/// Curve family of a key share
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    /// secp256k1 ECDSA
    Ecdsa,
    /// ed25519 EdDSA
    Eddsa,
}

impl KeyType {
    /// Relay message tag used by keygen and reshare runs of this key type
    ///
    /// ECDSA uses the default channel, EdDSA a separate one so that two runs
    /// on the same session never see each other's messages.
    pub fn message_tag(&self) -> &'static str {
        match self {
            KeyType::Ecdsa => "",
            KeyType::Eddsa => EDDSA_MESSAGE_TAG,
        }
    }

    /// Both key types in the order the orchestrators run them
    pub fn all() -> [KeyType; 2] {
        [KeyType::Ecdsa, KeyType::Eddsa]
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyType::Ecdsa => write!(f, "ECDSA"),
            KeyType::Eddsa => write!(f, "EdDSA"),
        }
    }
}

/// One party's key share: an opaque engine blob plus its public key
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyShare {
    /// Hex-encoded public key the share belongs to
    #[serde(rename = "pubkey")]
    pub pub_key: String,
    /// Base64-encoded engine key share
    pub keyshare: String,
}

impl KeyShare {
    /// Wrap raw engine bytes
    pub fn from_bytes(pub_key: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            pub_key: pub_key.into(),
            keyshare: STANDARD.encode(bytes),
        }
    }

    /// Decode the engine blob
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        STANDARD
            .decode(&self.keyshare)
            .map_err(|e| Error::Deserialization(format!("keyshare: {}", e)))
    }
}

impl fmt::Debug for KeyShare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyShare")
            .field("pub_key", &self.pub_key)
            .field("keyshare", &"[REDACTED]")
            .finish()
    }
}

/// A pre-hashed 32-byte message to be signed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDigest {
    hex: String,
    bytes: [u8; 32],
}

impl MessageDigest {
    /// Parse a hex-encoded 32-byte digest
    pub fn from_hex(hex_digest: &str) -> Result<Self> {
        let decoded = hex::decode(hex_digest).map_err(|e| {
            Error::InvalidInput(format!("message must be hex-encoded 32-byte hash: {}", e))
        })?;
        let bytes: [u8; 32] = decoded.as_slice().try_into().map_err(|_| {
            Error::InvalidInput(format!("message must be 32 bytes, got {}", decoded.len()))
        })?;

        Ok(Self {
            hex: hex_digest.to_string(),
            bytes,
        })
    }

    /// Build from raw bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self {
            hex: hex::encode(bytes),
            bytes,
        }
    }

    /// Digest bytes handed to the engine
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }

    /// Hex form as supplied by the caller
    pub fn as_hex(&self) -> &str {
        &self.hex
    }

    /// Relay message tag scoping this digest's signing round
    ///
    /// Hex MD5 of the hex digest string, matching what the co-signer derives
    /// from the same request.
    pub fn message_id(&self) -> String {
        hex::encode(Md5::digest(self.hex.as_bytes()))
    }
}

/// Result of signing one message digest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningResult {
    /// R component, 64 hex chars
    pub r: String,
    /// S component, 64 hex chars
    pub s: String,
    /// Recovery id, 2 hex chars
    pub recovery_id: String,
    /// Hex DER signature (ECDSA) or hex `r || s` (EdDSA)
    pub der_signature: String,
}

impl SigningResult {
    /// Recovery id reported when the engine does not supply one
    pub const DEFAULT_RECOVERY_ID: &'static str = "1b";

    /// Assemble a result from the engine's `r || s [|| v]` artifact
    pub fn from_artifact(key_type: KeyType, signature: &[u8]) -> Result<Self> {
        if signature.len() < 64 {
            return Err(Error::Engine(format!(
                "signature artifact too short: {} bytes",
                signature.len()
            )));
        }

        let r = &signature[..32];
        let s = &signature[32..64];
        let recovery_id = match signature.get(64) {
            Some(v) => format!("{:02x}", v),
            None => Self::DEFAULT_RECOVERY_ID.to_string(),
        };

        let der_signature = match key_type {
            KeyType::Ecdsa => {
                let sig = ecdsa::Signature::from_scalars(
                    *k256::FieldBytes::from_slice(r),
                    *k256::FieldBytes::from_slice(s),
                )
                .map_err(|e| Error::Engine(format!("invalid signature scalars: {}", e)))?;
                hex::encode(sig.to_der().as_bytes())
            }
            KeyType::Eddsa => hex::encode(&signature[..64]),
        };

        Ok(Self {
            r: hex::encode(r),
            s: hex::encode(s),
            recovery_id,
            der_signature,
        })
    }

    /// Raw `r || s` bytes
    pub fn to_bytes(&self) -> Result<[u8; 64]> {
        let r: [u8; 32] = hex::decode(&self.r)?
            .try_into()
            .map_err(|_| Error::Deserialization("Invalid r length".into()))?;
        let s: [u8; 32] = hex::decode(&self.s)?
            .try_into()
            .map_err(|_| Error::Deserialization("Invalid s length".into()))?;

        let mut bytes = [0u8; 64];
        bytes[..32].copy_from_slice(&r);
        bytes[32..].copy_from_slice(&s);
        Ok(bytes)
    }
}

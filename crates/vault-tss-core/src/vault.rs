//! Local vault model
//!
//! A vault is the local party's view of a shared key pair: both public
//! keys, the chain code, the signer set and this party's key shares.

use crate::{Error, KeyShare, KeyType, PartyId, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Library type tag of vaults produced by this crate
pub const LIB_TYPE_DKLS: u8 = 1;

/// The local party's vault
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalVault {
    /// Human-readable name
    pub name: String,
    /// Hex ECDSA public key
    pub public_key_ecdsa: String,
    /// Hex EdDSA public key
    pub public_key_eddsa: String,
    /// Hex chain code shared with the co-signer at keygen
    pub hex_chain_code: String,
    /// Party id of the local device
    pub local_party_id: PartyId,
    /// Parties holding shares, in session order
    pub signers: Vec<PartyId>,
    /// Local key shares, one per key type
    pub key_shares: Vec<KeyShare>,
    /// Session prefix of the last reshare, empty if never reshared
    #[serde(default)]
    pub reshare_prefix: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Engine library tag
    pub lib_type: u8,
}

impl LocalVault {
    /// Storage identifier
    pub fn id(&self) -> &str {
        &self.public_key_ecdsa
    }

    /// Public key for a key type
    pub fn public_key(&self, key_type: KeyType) -> &str {
        match key_type {
            KeyType::Ecdsa => &self.public_key_ecdsa,
            KeyType::Eddsa => &self.public_key_eddsa,
        }
    }

    /// Key share held for a public key
    pub fn keyshare_for(&self, pub_key: &str) -> Result<&KeyShare> {
        self.key_shares
            .iter()
            .find(|s| s.pub_key == pub_key)
            .ok_or_else(|| Error::KeyShareNotFound(pub_key.to_string()))
    }

    /// Replace the share of the key type's current public key with `share`
    ///
    /// The public key field follows the new share.
    pub fn replace_key_share(&mut self, key_type: KeyType, share: KeyShare) {
        let current = self.public_key(key_type).to_string();
        self.key_shares.retain(|s| s.pub_key != current);
        match key_type {
            KeyType::Ecdsa => self.public_key_ecdsa = share.pub_key.clone(),
            KeyType::Eddsa => self.public_key_eddsa = share.pub_key.clone(),
        }
        self.key_shares.push(share);
    }

    /// Whether `party_id` was a signer of this vault
    pub fn is_signer(&self, party_id: &str) -> bool {
        self.signers.iter().any(|p| p == party_id)
    }
}

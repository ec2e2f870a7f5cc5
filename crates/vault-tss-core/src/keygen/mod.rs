//! Key generation and resharing
//!
//! A keygen is a two-party session between the local device and the
//! fast-vault co-signer. It runs the ECDSA protocol on the default relay
//! channel, then the EdDSA protocol under its own tag, and returns a vault
//! holding both new shares.

mod reshare;

pub use reshare::{party_partition, reshare_threshold};

use crate::cosigner::KeygenRequest;
use crate::engine::{SessionGuard, SessionKind};
use crate::party::{TssParty, keyshare_from_artifact};
use crate::vault::LIB_TYPE_DKLS;
use crate::{Error, KeyType, LocalVault, Result};
use chrono::Utc;
use rand::RngCore;
use tracing::{info, instrument};

/// Parties taking part in a keygen: the device and the fast-vault server
pub const KEYGEN_PARTIES: usize = 2;

/// Signing threshold of a fresh key over `n` parties, `ceil(2n / 3)`
pub fn keygen_threshold(n: usize) -> usize {
    (2 * n).div_ceil(3)
}

impl TssParty {
    /// Generate a new vault together with the fast-vault co-signer
    #[instrument(skip(self, encryption_password, email), fields(party = %self.local_party_id))]
    pub async fn keygen(
        &self,
        name: &str,
        encryption_password: &str,
        email: &str,
    ) -> Result<LocalVault> {
        if name.is_empty() {
            return Err(Error::InvalidInput("vault name is empty".into()));
        }

        let (session_id, key, transport) = Self::new_session()?;
        let mut chain_code = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut chain_code);
        let hex_chain_code = hex::encode(chain_code);
        info!(session = %session_id, "Starting keygen");

        self.register(&session_id).await?;
        self.fast_vault
            .join_keygen(&KeygenRequest {
                name: name.to_string(),
                session_id: session_id.clone(),
                hex_encryption_key: key.to_hex(),
                hex_chain_code: hex_chain_code.clone(),
                local_party_id: self.local_party_id.clone(),
                encryption_password: encryption_password.to_string(),
                email: email.to_string(),
                lib_type: LIB_TYPE_DKLS,
            })
            .await?;

        let parties = self.gather(&session_id, KEYGEN_PARTIES).await?;
        let threshold = keygen_threshold(parties.len());

        let mut key_shares = Vec::with_capacity(2);
        for key_type in KeyType::all() {
            let stage = format!("{} keygen", key_type);
            let tag = key_type.message_tag();
            let engine = self.engines.get(key_type);

            let setup = engine
                .keygen_setup(threshold, &parties, Some(chain_code.as_slice()))
                .map_err(|e| Error::setup(&stage, e))?;
            self.publish_setup(&transport, &session_id, tag, &setup)
                .await?;
            let session = SessionGuard::create(
                engine,
                SessionKind::Keygen,
                &setup,
                &self.local_party_id,
                None,
            )
            .map_err(|e| Error::setup(&stage, e))?;

            let artifact = self
                .drive(&transport, &session_id, tag, &stage, session)
                .await?;
            let (share, _) = keyshare_from_artifact(engine, &artifact)?;
            info!(session = %session_id, key_type = %key_type, public_key = %share.pub_key, "Key generated");
            key_shares.push(share);
        }
        self.complete(&session_id).await;

        Ok(LocalVault {
            name: name.to_string(),
            public_key_ecdsa: key_shares[0].pub_key.clone(),
            public_key_eddsa: key_shares[1].pub_key.clone(),
            hex_chain_code,
            local_party_id: self.local_party_id.clone(),
            signers: parties,
            key_shares,
            reshare_prefix: String::new(),
            created_at: Utc::now(),
            lib_type: LIB_TYPE_DKLS,
        })
    }
}

//! Threshold signing
//!
//! A keysign session signs an ordered batch of 32-byte digests with the
//! fast-vault co-signer. Each digest gets its own protocol run, scoped on
//! the relay by a tag derived from the digest, and the results come back in
//! input order.

use crate::cosigner::KeysignRequest;
use crate::engine::{KeyshareGuard, SessionGuard, SessionKind};
use crate::party::TssParty;
use crate::{Error, KeyType, LocalVault, MessageDigest, Result, SigningResult};
use tracing::{debug, info, instrument};

/// Parties taking part in a keysign: the device and the fast-vault server
pub const KEYSIGN_PARTIES: usize = 2;

/// Derivation path as handed to the engine: hardened markers stripped
pub fn derive_path_bytes(derive_path: &str) -> Vec<u8> {
    derive_path.replace('\'', "").into_bytes()
}

impl TssParty {
    /// Sign each hex digest in `messages` with the vault's `key_type` key
    ///
    /// Fails before contacting anyone if a digest is malformed or the vault
    /// holds no share for the key.
    #[instrument(skip(self, vault, messages, vault_password), fields(party = %self.local_party_id, vault = %vault.public_key_ecdsa, count = messages.len()))]
    pub async fn keysign(
        &self,
        vault: &LocalVault,
        messages: &[String],
        derive_path: &str,
        key_type: KeyType,
        vault_password: &str,
    ) -> Result<Vec<SigningResult>> {
        if messages.is_empty() {
            return Err(Error::InvalidInput("nothing to sign".into()));
        }
        let digests = messages
            .iter()
            .map(|m| MessageDigest::from_hex(m))
            .collect::<Result<Vec<_>>>()?;
        let share = vault.keyshare_for(vault.public_key(key_type))?;

        let (session_id, key, transport) = Self::new_session()?;
        info!(session = %session_id, key_type = %key_type, "Starting keysign");

        self.register(&session_id).await?;
        self.fast_vault
            .join_keysign(&KeysignRequest {
                public_key: vault.public_key_ecdsa.clone(),
                messages: digests.iter().map(|d| d.as_hex().to_string()).collect(),
                session: session_id.clone(),
                hex_encryption_key: key.to_hex(),
                derive_path: derive_path.to_string(),
                is_ecdsa: key_type == KeyType::Ecdsa,
                vault_password: vault_password.to_string(),
            })
            .await?;

        let parties = self.gather(&session_id, KEYSIGN_PARTIES).await?;

        let engine = self.engines.get(key_type);
        let keyshare = KeyshareGuard::load(engine, &share.to_bytes()?)?;
        let key_id = engine.key_id(keyshare.handle())?;
        let path = derive_path_bytes(derive_path);

        let mut results = Vec::with_capacity(digests.len());
        for digest in &digests {
            let tag = digest.message_id();
            debug!(session = %session_id, tag = %tag, digest = %digest.as_hex(), "Signing message");

            let setup = engine
                .sign_setup(&key_id, &path, digest.as_bytes(), &parties)
                .map_err(|e| Error::setup("keysign", e))?;
            self.publish_setup(&transport, &session_id, &tag, &setup)
                .await?;
            let session = SessionGuard::create(
                engine,
                SessionKind::Sign,
                &setup,
                &self.local_party_id,
                Some(keyshare.handle()),
            )
            .map_err(|e| Error::setup("keysign", e))?;

            let artifact = self
                .drive(&transport, &session_id, &tag, "keysign", session)
                .await?;
            results.push(SigningResult::from_artifact(key_type, &artifact)?);
        }
        self.complete(&session_id).await;

        info!(session = %session_id, signatures = results.len(), "Keysign finished");
        Ok(results)
    }
}

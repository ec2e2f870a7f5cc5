//! Quorum change
//!
//! Moves a vault's key from its current signers to the current signers plus
//! the fast-vault server and the verifier, without reconstructing the key.

use crate::cosigner::ReshareRequest;
use crate::engine::{KeyshareGuard, SessionGuard, SessionKind};
use crate::party::{TssParty, keyshare_from_artifact};
use crate::{Error, KeyType, LocalVault, PartyId, Result};
use tracing::{info, instrument, warn};

/// Indices of old and new parties within the session's party list
///
/// Old parties are those that signed the previous vault; every session
/// party holds a share afterwards.
pub fn party_partition(parties: &[PartyId], old_signers: &[PartyId]) -> (Vec<usize>, Vec<usize>) {
    let old = parties
        .iter()
        .enumerate()
        .filter(|(_, p)| old_signers.contains(*p))
        .map(|(i, _)| i)
        .collect();
    let new = (0..parties.len()).collect();
    (old, new)
}

/// Signing threshold after a reshare over `n` parties, `ceil(2n / 3) - 1`
pub fn reshare_threshold(n: usize) -> usize {
    (2 * n).div_ceil(3).saturating_sub(1)
}

impl TssParty {
    /// Reshare `vault` onto its signers plus the two service parties
    ///
    /// Requires a verifier. The returned vault carries the new shares; the
    /// input vault is left untouched.
    #[instrument(skip(self, vault, vault_password, email), fields(party = %self.local_party_id, vault = %vault.public_key_ecdsa))]
    pub async fn reshare(
        &self,
        vault: &LocalVault,
        plugin_id: Option<&str>,
        vault_password: &str,
        email: &str,
    ) -> Result<LocalVault> {
        let verifier = self
            .verifier
            .as_ref()
            .ok_or_else(|| Error::InvalidInput("reshare requires a verifier".into()))?;
        for key_type in KeyType::all() {
            vault.keyshare_for(vault.public_key(key_type))?;
        }

        let (session_id, key, transport) = Self::new_session()?;
        info!(session = %session_id, old_signers = ?vault.signers, "Starting reshare");
        self.register(&session_id).await?;

        let request = ReshareRequest {
            name: vault.name.clone(),
            public_key: vault.public_key_ecdsa.clone(),
            session_id: session_id.clone(),
            hex_encryption_key: key.to_hex(),
            hex_chain_code: vault.hex_chain_code.clone(),
            local_party_id: self.local_party_id.clone(),
            old_parties: vault.signers.clone(),
            encryption_password: vault_password.to_string(),
            email: email.to_string(),
            old_reshare_prefix: vault.reshare_prefix.clone(),
            lib_type: vault.lib_type,
            plugin_id: None,
        };
        if let Err(e) = self.fast_vault.join_reshare(&request).await {
            warn!(session = %session_id, error = %e, "Fast vault did not join reshare");
        }
        verifier
            .join_reshare(&ReshareRequest {
                plugin_id: plugin_id.map(str::to_string),
                ..request
            })
            .await?;

        let parties = self.gather(&session_id, vault.signers.len() + 2).await?;
        let (old_indices, new_indices) = party_partition(&parties, &vault.signers);
        let threshold = reshare_threshold(parties.len());
        info!(session = %session_id, threshold, old = ?old_indices, "Partitioned parties");

        let mut reshared = vault.clone();
        for key_type in KeyType::all() {
            let stage = format!("{} reshare", key_type);
            let tag = key_type.message_tag();
            let engine = self.engines.get(key_type);
            let share = vault.keyshare_for(vault.public_key(key_type))?;
            let keyshare = KeyshareGuard::load(engine, &share.to_bytes()?)?;

            let setup = engine
                .quorum_change_setup(
                    keyshare.handle(),
                    threshold,
                    &parties,
                    &old_indices,
                    &new_indices,
                )
                .map_err(|e| Error::setup(&stage, e))?;
            self.publish_setup(&transport, &session_id, tag, &setup)
                .await?;
            let session = SessionGuard::create(
                engine,
                SessionKind::QuorumChange,
                &setup,
                &self.local_party_id,
                Some(keyshare.handle()),
            )
            .map_err(|e| Error::setup(&stage, e))?;

            let artifact = self
                .drive(&transport, &session_id, tag, &stage, session)
                .await?;
            if artifact.is_empty() {
                return Err(Error::EngineFinishFailed {
                    session_id,
                    reason: format!("{} produced no key share", stage),
                });
            }

            let (share, chain_code) = keyshare_from_artifact(engine, &artifact)?;
            info!(session = %session_id, key_type = %key_type, public_key = %share.pub_key, "Key reshared");
            reshared.replace_key_share(key_type, share);
            if key_type == KeyType::Ecdsa {
                if let Some(chain_code) = chain_code {
                    reshared.hex_chain_code = chain_code;
                }
            }
        }
        self.complete(&session_id).await;

        reshared.signers = parties;
        reshared.reshare_prefix = session_id.chars().take(8).collect();
        Ok(reshared)
    }
}

//! Co-signer join requests
//!
//! A two-party session only starts once the remote co-signer knows it must
//! join. The [`CoSigner`] trait carries that invitation; the HTTP clients
//! for the fast-vault server and the verifier live in `vault-tss-relay`,
//! and [`LocalCoSigner`] plays the remote side in-process.

use crate::config::DriverConfig;
use crate::driver::RoundDriver;
use crate::engine::{Engines, KeyshareGuard, SessionGuard, SessionKind};
use crate::mpc::Relay;
use crate::party::keyshare_from_artifact;
use crate::rendezvous::PartyRendezvous;
use crate::transport::EncryptedTransport;
use crate::vault::LIB_TYPE_DKLS;
use crate::{Error, KeyShare, KeyType, LocalVault, MessageDigest, PartyId, Result};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{Instrument, error, info, info_span, warn};

// ============ Requests ============

/// Invitation to join a key generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeygenRequest {
    pub name: String,
    pub session_id: String,
    pub hex_encryption_key: String,
    pub hex_chain_code: String,
    /// Party id of the initiating device
    pub local_party_id: String,
    pub encryption_password: String,
    pub email: String,
    pub lib_type: u8,
}

/// Invitation to co-sign a batch of digests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeysignRequest {
    /// ECDSA public key identifying the vault
    pub public_key: String,
    /// Hex digests, signed in order
    pub messages: Vec<String>,
    pub session: String,
    pub hex_encryption_key: String,
    pub derive_path: String,
    pub is_ecdsa: bool,
    pub vault_password: String,
}

/// Invitation to join a reshare
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReshareRequest {
    pub name: String,
    /// ECDSA public key identifying the vault
    pub public_key: String,
    pub session_id: String,
    pub hex_encryption_key: String,
    pub hex_chain_code: String,
    /// Party id of the initiating device
    pub local_party_id: String,
    pub old_parties: Vec<String>,
    pub encryption_password: String,
    pub email: String,
    pub old_reshare_prefix: String,
    pub lib_type: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_id: Option<String>,
}

/// A remote party that can be invited into sessions
#[async_trait]
pub trait CoSigner: Send + Sync {
    /// Ask the co-signer to join a key generation
    async fn join_keygen(&self, request: &KeygenRequest) -> Result<()>;

    /// Ask the co-signer to co-sign
    async fn join_keysign(&self, request: &KeysignRequest) -> Result<()>;

    /// Ask the co-signer to join a reshare
    async fn join_reshare(&self, request: &ReshareRequest) -> Result<()>;
}

// ============ In-Process Co-Signer ============

/// Co-signer running inside this process
///
/// Each join registers every configured party id on the session and spawns
/// one task per party that follows the session the way a remote co-signer
/// would: wait for the start signal, fetch each setup message and drive the
/// same round driver as the initiator. Vaults it ends up holding are kept
/// per party, keyed by ECDSA public key.
#[derive(Clone)]
pub struct LocalCoSigner {
    party_ids: Vec<PartyId>,
    relay: Arc<dyn Relay>,
    engines: Arc<Engines>,
    config: DriverConfig,
    password: Option<String>,
    vaults: Arc<DashMap<(PartyId, String), LocalVault>>,
    tasks: Arc<Mutex<Vec<JoinHandle<Result<()>>>>>,
}

impl LocalCoSigner {
    /// Co-signer acting as a single party
    pub fn new(
        party_id: impl Into<PartyId>,
        relay: Arc<dyn Relay>,
        engines: Arc<Engines>,
        config: DriverConfig,
    ) -> Self {
        Self::with_parties(vec![party_id.into()], relay, engines, config)
    }

    /// Co-signer acting as several parties, joining in the given order
    pub fn with_parties(
        party_ids: Vec<PartyId>,
        relay: Arc<dyn Relay>,
        engines: Arc<Engines>,
        config: DriverConfig,
    ) -> Self {
        Self {
            party_ids,
            relay,
            engines,
            config,
            password: None,
            vaults: Arc::new(DashMap::new()),
            tasks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Require this vault password on keysign requests
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Party ids this co-signer plays
    pub fn party_ids(&self) -> &[PartyId] {
        &self.party_ids
    }

    /// Vault held by one of this co-signer's parties
    pub fn vault(&self, party_id: &str, public_key_ecdsa: &str) -> Option<LocalVault> {
        self.vaults
            .get(&(party_id.to_string(), public_key_ecdsa.to_string()))
            .map(|v| v.value().clone())
    }

    /// Hand a stored vault to one of this co-signer's parties
    pub fn insert_vault(&self, party_id: impl Into<PartyId>, vault: LocalVault) {
        self.vaults
            .insert((party_id.into(), vault.public_key_ecdsa.clone()), vault);
    }

    /// Every held vault with its party, sorted by party
    pub fn vaults(&self) -> Vec<(PartyId, LocalVault)> {
        let mut held: Vec<_> = self
            .vaults
            .iter()
            .map(|entry| (entry.key().0.clone(), entry.value().clone()))
            .collect();
        held.sort_by(|a, b| a.0.cmp(&b.0));
        held
    }

    /// Wait for every spawned session task; returns the first failure
    pub async fn wait_idle(&self) -> Result<()> {
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        let mut first_error = None;
        for task in tasks {
            let outcome = task
                .await
                .map_err(|e| Error::CoSigner(format!("session task panicked: {}", e)))
                .and_then(|r| r);
            if let Err(e) = outcome {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn register_all(&self, session_id: &str) -> Result<()> {
        for party in &self.party_ids {
            self.relay
                .register_session(session_id, party)
                .await
                .map_err(|e| Error::CoSigner(format!("{} failed to register: {}", party, e)))?;
        }
        Ok(())
    }

    fn spawn<F>(&self, party: &str, session_id: &str, work: F)
    where
        F: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        let span = info_span!("cosigner", party = %party, session = %session_id);
        let task = tokio::spawn(
            async move {
                let result = work.await;
                if let Err(e) = &result {
                    error!(error = %e, "Co-signer session failed");
                }
                result
            }
            .instrument(span),
        );
        self.tasks.lock().push(task);
    }

    fn rendezvous(&self) -> PartyRendezvous {
        PartyRendezvous::from_config(self.relay.clone(), &self.config)
    }

    fn driver(
        &self,
        transport: &EncryptedTransport,
        session_id: &str,
        party: &str,
        message_tag: &str,
        stage: &str,
    ) -> RoundDriver {
        RoundDriver::new(
            self.relay.clone(),
            transport.clone(),
            session_id,
            party,
            self.config.clone(),
        )
        .with_message_tag(message_tag)
        .with_stage(stage)
    }

    async fn complete(&self, session_id: &str, party: &str) {
        if let Err(e) = self.relay.complete_session(session_id, party).await {
            warn!(error = %e, "Failed to complete session");
        }
    }

    async fn follow_keygen(self, party: PartyId, request: KeygenRequest) -> Result<()> {
        let session_id = request.session_id.as_str();
        let transport = EncryptedTransport::from_hex(&request.hex_encryption_key)?;
        let parties = self.rendezvous().wait_for_start(session_id, &party).await?;

        let mut shares = Vec::new();
        for key_type in KeyType::all() {
            let tag = key_type.message_tag();
            let engine = self.engines.get(key_type);
            let sealed = self.rendezvous().wait_for_setup_message(session_id, tag).await?;
            let setup = transport.open(&sealed)?;

            let session = SessionGuard::create(engine, SessionKind::Keygen, &setup, &party, None)
                .map_err(|e| Error::setup(format!("{} keygen", key_type), e))?;
            let artifact = self
                .driver(&transport, session_id, &party, tag, &format!("{} keygen", key_type))
                .run(session)
                .await?;
            shares.push(keyshare_from_artifact(engine, &artifact)?.0);
        }
        self.complete(session_id, &party).await;

        let [ecdsa, eddsa]: [KeyShare; 2] = shares
            .try_into()
            .map_err(|_| Error::Engine("expected one share per key type".into()))?;
        let vault = LocalVault {
            name: request.name.clone(),
            public_key_ecdsa: ecdsa.pub_key.clone(),
            public_key_eddsa: eddsa.pub_key.clone(),
            hex_chain_code: request.hex_chain_code.clone(),
            local_party_id: party.clone(),
            signers: parties,
            key_shares: vec![ecdsa, eddsa],
            reshare_prefix: String::new(),
            created_at: Utc::now(),
            lib_type: request.lib_type,
        };
        info!(public_key = %vault.public_key_ecdsa, "Co-signer keygen finished");
        self.vaults
            .insert((party, vault.public_key_ecdsa.clone()), vault);
        Ok(())
    }

    async fn follow_keysign(
        self,
        party: PartyId,
        vault: LocalVault,
        request: KeysignRequest,
    ) -> Result<()> {
        let session_id = request.session.as_str();
        let transport = EncryptedTransport::from_hex(&request.hex_encryption_key)?;
        self.rendezvous().wait_for_start(session_id, &party).await?;

        let key_type = if request.is_ecdsa {
            KeyType::Ecdsa
        } else {
            KeyType::Eddsa
        };
        let engine = self.engines.get(key_type);
        let share = vault.keyshare_for(vault.public_key(key_type))?;
        let keyshare = KeyshareGuard::load(engine, &share.to_bytes()?)?;

        for message in &request.messages {
            let tag = MessageDigest::from_hex(message)?.message_id();
            let sealed = self.rendezvous().wait_for_setup_message(session_id, &tag).await?;
            let setup = transport.open(&sealed)?;

            let session = SessionGuard::create(
                engine,
                SessionKind::Sign,
                &setup,
                &party,
                Some(keyshare.handle()),
            )
            .map_err(|e| Error::setup("keysign", e))?;
            self.driver(&transport, session_id, &party, &tag, "keysign")
                .run(session)
                .await?;
        }
        self.complete(session_id, &party).await;
        Ok(())
    }

    async fn follow_reshare(
        self,
        party: PartyId,
        old_vault: Option<LocalVault>,
        request: ReshareRequest,
    ) -> Result<()> {
        let session_id = request.session_id.as_str();
        let transport = EncryptedTransport::from_hex(&request.hex_encryption_key)?;
        let parties = self.rendezvous().wait_for_start(session_id, &party).await?;

        let mut results = Vec::new();
        for key_type in KeyType::all() {
            let tag = key_type.message_tag();
            let engine = self.engines.get(key_type);
            let sealed = self.rendezvous().wait_for_setup_message(session_id, tag).await?;
            let setup = transport.open(&sealed)?;

            let keyshare = match &old_vault {
                Some(vault) => {
                    let share = vault.keyshare_for(vault.public_key(key_type))?;
                    Some(KeyshareGuard::load(engine, &share.to_bytes()?)?)
                }
                None => None,
            };
            let session = SessionGuard::create(
                engine,
                SessionKind::QuorumChange,
                &setup,
                &party,
                keyshare.as_ref().map(|k| k.handle()),
            )
            .map_err(|e| Error::setup(format!("{} reshare", key_type), e))?;
            let artifact = self
                .driver(&transport, session_id, &party, tag, &format!("{} reshare", key_type))
                .run(session)
                .await?;

            if artifact.is_empty() {
                results.push(None);
            } else {
                results.push(Some(keyshare_from_artifact(engine, &artifact)?));
            }
        }
        self.complete(session_id, &party).await;

        let [Some((ecdsa, chain_code)), Some((eddsa, _))]: [Option<(KeyShare, Option<String>)>; 2] =
            results
                .try_into()
                .map_err(|_| Error::Engine("expected one result per key type".into()))?
        else {
            info!("Left the quorum");
            return Ok(());
        };

        let mut vault = old_vault.unwrap_or_else(|| LocalVault {
            name: request.name.clone(),
            public_key_ecdsa: request.public_key.clone(),
            public_key_eddsa: String::new(),
            hex_chain_code: request.hex_chain_code.clone(),
            local_party_id: party.clone(),
            signers: Vec::new(),
            key_shares: Vec::new(),
            reshare_prefix: String::new(),
            created_at: Utc::now(),
            lib_type: LIB_TYPE_DKLS,
        });
        self.vaults
            .remove(&(party.clone(), vault.public_key_ecdsa.clone()));
        vault.replace_key_share(KeyType::Ecdsa, ecdsa);
        vault.replace_key_share(KeyType::Eddsa, eddsa);
        if let Some(chain_code) = chain_code {
            vault.hex_chain_code = chain_code;
        }
        vault.signers = parties;
        vault.reshare_prefix = session_id.chars().take(8).collect();

        info!(public_key = %vault.public_key_ecdsa, "Co-signer reshare finished");
        self.vaults
            .insert((party, vault.public_key_ecdsa.clone()), vault);
        Ok(())
    }
}

#[async_trait]
impl CoSigner for LocalCoSigner {
    async fn join_keygen(&self, request: &KeygenRequest) -> Result<()> {
        self.register_all(&request.session_id).await?;
        for party in &self.party_ids {
            let work = self.clone().follow_keygen(party.clone(), request.clone());
            self.spawn(party, &request.session_id, work);
        }
        Ok(())
    }

    async fn join_keysign(&self, request: &KeysignRequest) -> Result<()> {
        if let Some(expected) = &self.password {
            if *expected != request.vault_password {
                return Err(Error::CoSigner("invalid vault password".into()));
            }
        }

        let mut jobs = Vec::new();
        for party in &self.party_ids {
            let vault = self.vault(party, &request.public_key).ok_or_else(|| {
                Error::CoSigner(format!("{} holds no vault {}", party, request.public_key))
            })?;
            jobs.push((party.clone(), vault));
        }

        self.register_all(&request.session).await?;
        for (party, vault) in jobs {
            let work = self
                .clone()
                .follow_keysign(party.clone(), vault, request.clone());
            self.spawn(&party, &request.session, work);
        }
        Ok(())
    }

    async fn join_reshare(&self, request: &ReshareRequest) -> Result<()> {
        self.register_all(&request.session_id).await?;
        for party in &self.party_ids {
            let old_vault = self.vault(party, &request.public_key);
            let work = self
                .clone()
                .follow_reshare(party.clone(), old_vault, request.clone());
            self.spawn(party, &request.session_id, work);
        }
        Ok(())
    }
}

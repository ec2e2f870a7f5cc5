//! The initiating party
//!
//! [`TssParty`] owns everything an orchestrator needs: the relay, the
//! engines, the co-signers it invites and the timing configuration. The
//! keygen, keysign and reshare flows live in their own modules as `impl`
//! blocks on this type and share the session plumbing below.

use crate::config::DriverConfig;
use crate::cosigner::CoSigner;
use crate::driver::RoundDriver;
use crate::engine::{Engines, KeyshareGuard, ProtocolEngine, SessionGuard};
use crate::mpc::Relay;
use crate::rendezvous::PartyRendezvous;
use crate::transport::{EncryptedTransport, EncryptionKey};
use crate::{Error, KeyShare, PartyId, Result};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Local device coordinating threshold sessions with remote co-signers
#[derive(Clone)]
pub struct TssParty {
    pub(crate) local_party_id: PartyId,
    pub(crate) relay: Arc<dyn Relay>,
    pub(crate) engines: Arc<Engines>,
    pub(crate) fast_vault: Arc<dyn CoSigner>,
    pub(crate) verifier: Option<Arc<dyn CoSigner>>,
    pub(crate) config: DriverConfig,
}

impl TssParty {
    /// Create a party that invites `fast_vault` into every session
    pub fn new(
        local_party_id: impl Into<PartyId>,
        relay: Arc<dyn Relay>,
        engines: Arc<Engines>,
        fast_vault: Arc<dyn CoSigner>,
    ) -> Self {
        Self {
            local_party_id: local_party_id.into(),
            relay,
            engines,
            fast_vault,
            verifier: None,
            config: DriverConfig::default(),
        }
    }

    /// Add the verifier invited into reshares
    pub fn with_verifier(mut self, verifier: Arc<dyn CoSigner>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Set timing configuration
    pub fn with_config(mut self, config: DriverConfig) -> Self {
        self.config = config;
        self
    }

    /// Local party id
    pub fn local_party_id(&self) -> &str {
        &self.local_party_id
    }

    pub(crate) fn rendezvous(&self) -> PartyRendezvous {
        PartyRendezvous::from_config(self.relay.clone(), &self.config)
    }

    /// Fresh session id and transport key
    pub(crate) fn new_session() -> Result<(String, EncryptionKey, EncryptedTransport)> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let key = EncryptionKey::generate();
        let transport = EncryptedTransport::new(&key)?;
        Ok((session_id, key, transport))
    }

    pub(crate) async fn register(&self, session_id: &str) -> Result<()> {
        self.relay
            .register_session(session_id, &self.local_party_id)
            .await
            .map_err(|e| Error::RegistrationFailed {
                session_id: session_id.to_string(),
                reason: e.to_string(),
            })
    }

    /// Wait for `expected` parties and start the session with them
    pub(crate) async fn gather(&self, session_id: &str, expected: usize) -> Result<Vec<PartyId>> {
        let parties = self
            .rendezvous()
            .wait_for_parties(session_id, expected)
            .await?;
        info!(session = %session_id, parties = ?parties, "All parties joined, starting session");

        self.relay.start_session(session_id, &parties).await?;
        Ok(parties)
    }

    /// Publish a setup message under `message_tag`
    pub(crate) async fn publish_setup(
        &self,
        transport: &EncryptedTransport,
        session_id: &str,
        message_tag: &str,
        setup: &[u8],
    ) -> Result<()> {
        let sealed = transport.seal(setup)?;
        self.relay
            .upload_setup_message(session_id, message_tag, &sealed)
            .await
    }

    /// Run one session to completion under `message_tag`
    pub(crate) async fn drive(
        &self,
        transport: &EncryptedTransport,
        session_id: &str,
        message_tag: &str,
        stage: &str,
        session: SessionGuard<'_>,
    ) -> Result<Vec<u8>> {
        let mut driver = RoundDriver::new(
            self.relay.clone(),
            transport.clone(),
            session_id,
            self.local_party_id.clone(),
            self.config.clone(),
        )
        .with_message_tag(message_tag)
        .with_stage(stage);
        driver.run(session).await
    }

    /// Best-effort completion signal
    pub(crate) async fn complete(&self, session_id: &str) {
        if let Err(e) = self
            .relay
            .complete_session(session_id, &self.local_party_id)
            .await
        {
            warn!(session = %session_id, error = %e, "Failed to complete session");
        }
    }
}

impl fmt::Debug for TssParty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TssParty")
            .field("local_party_id", &self.local_party_id)
            .field("has_verifier", &self.verifier.is_some())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Key share and hex chain code carried by a keygen or reshare artifact
pub(crate) fn keyshare_from_artifact(
    engine: &dyn ProtocolEngine,
    artifact: &[u8],
) -> Result<(KeyShare, Option<String>)> {
    let keyshare = KeyshareGuard::load(engine, artifact)?;
    let public_key = hex::encode(engine.public_key(keyshare.handle())?);
    let chain_code = engine.chain_code(keyshare.handle())?.map(hex::encode);
    Ok((KeyShare::from_bytes(public_key, artifact), chain_code))
}

//! Shared fakes for the test suite

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use vault_tss_core::{
    CoSigner, DriverConfig, Engines, Error, Handle, KeyType, KeygenRequest, KeysignRequest,
    LocalCoSigner, LocalVault, MemoryRelay, PartyId, ProtocolEngine, ProtocolMessage, Relay,
    ReshareRequest, Result, SessionKind, SimulatedEngine, TssParty,
    mpc::async_trait,
};

/// Timing tight enough for tests, loose enough for slow CI machines
pub fn fast_config() -> DriverConfig {
    DriverConfig::default()
        .with_poll_interval(Duration::from_millis(5))
        .with_protocol_timeout(Duration::from_secs(10))
        .with_rendezvous_timeout(Duration::from_secs(10))
}

// ============================================================================
// Engines
// ============================================================================

/// Simulated engine shared with the test, counting applied messages
pub struct TrackedEngine {
    inner: Arc<SimulatedEngine>,
    applied: Arc<AtomicUsize>,
}

impl TrackedEngine {
    pub fn new(inner: Arc<SimulatedEngine>) -> (Self, Arc<AtomicUsize>) {
        let applied = Arc::new(AtomicUsize::new(0));
        let engine = Self {
            inner,
            applied: applied.clone(),
        };
        (engine, applied)
    }
}

impl ProtocolEngine for TrackedEngine {
    fn key_type(&self) -> KeyType {
        self.inner.key_type()
    }

    fn load_keyshare(&self, bytes: &[u8]) -> Result<Handle> {
        self.inner.load_keyshare(bytes)
    }

    fn free_keyshare(&self, keyshare: Handle) -> Result<()> {
        self.inner.free_keyshare(keyshare)
    }

    fn key_id(&self, keyshare: Handle) -> Result<Vec<u8>> {
        self.inner.key_id(keyshare)
    }

    fn public_key(&self, keyshare: Handle) -> Result<Vec<u8>> {
        self.inner.public_key(keyshare)
    }

    fn chain_code(&self, keyshare: Handle) -> Result<Option<Vec<u8>>> {
        self.inner.chain_code(keyshare)
    }

    fn keygen_setup(
        &self,
        threshold: usize,
        parties: &[PartyId],
        chain_code: Option<&[u8]>,
    ) -> Result<Vec<u8>> {
        self.inner.keygen_setup(threshold, parties, chain_code)
    }

    fn sign_setup(
        &self,
        key_id: &[u8],
        derive_path: &[u8],
        payload: &[u8],
        parties: &[PartyId],
    ) -> Result<Vec<u8>> {
        self.inner.sign_setup(key_id, derive_path, payload, parties)
    }

    fn quorum_change_setup(
        &self,
        keyshare: Handle,
        threshold: usize,
        parties: &[PartyId],
        old_indices: &[usize],
        new_indices: &[usize],
    ) -> Result<Vec<u8>> {
        self.inner
            .quorum_change_setup(keyshare, threshold, parties, old_indices, new_indices)
    }

    fn session_from_setup(
        &self,
        kind: SessionKind,
        setup: &[u8],
        local_party_id: &str,
        keyshare: Option<Handle>,
    ) -> Result<Handle> {
        self.inner
            .session_from_setup(kind, setup, local_party_id, keyshare)
    }

    fn next_outbound(&self, session: Handle) -> Result<Vec<u8>> {
        self.inner.next_outbound(session)
    }

    fn receiver_of(&self, session: Handle, message: &[u8], index: usize) -> Result<Option<PartyId>> {
        self.inner.receiver_of(session, message, index)
    }

    fn apply_inbound(&self, session: Handle, message: &[u8]) -> Result<bool> {
        self.applied.fetch_add(1, Ordering::SeqCst);
        self.inner.apply_inbound(session, message)
    }

    fn finish(&self, session: Handle) -> Result<Vec<u8>> {
        self.inner.finish(session)
    }

    fn free_session(&self, session: Handle) -> Result<()> {
        self.inner.free_session(session)
    }
}

// ============================================================================
// Relays
// ============================================================================

/// Relay that delivers every queued message twice per download
pub struct EchoRelay {
    pub inner: MemoryRelay,
}

#[async_trait]
impl Relay for EchoRelay {
    async fn register_session(&self, session_id: &str, party_id: &str) -> Result<()> {
        self.inner.register_session(session_id, party_id).await
    }

    async fn session_parties(&self, session_id: &str) -> Result<Vec<PartyId>> {
        self.inner.session_parties(session_id).await
    }

    async fn start_session(&self, session_id: &str, parties: &[PartyId]) -> Result<()> {
        self.inner.start_session(session_id, parties).await
    }

    async fn started_parties(&self, session_id: &str) -> Result<Vec<PartyId>> {
        self.inner.started_parties(session_id).await
    }

    async fn complete_session(&self, session_id: &str, party_id: &str) -> Result<()> {
        self.inner.complete_session(session_id, party_id).await
    }

    async fn upload_setup_message(&self, session_id: &str, message_tag: &str, setup: &str) -> Result<()> {
        self.inner
            .upload_setup_message(session_id, message_tag, setup)
            .await
    }

    async fn download_setup_message(&self, session_id: &str, message_tag: &str) -> Result<Option<String>> {
        self.inner
            .download_setup_message(session_id, message_tag)
            .await
    }

    async fn send_message(&self, message_tag: &str, message: &ProtocolMessage) -> Result<()> {
        self.inner.send_message(message_tag, message).await
    }

    async fn download_messages(
        &self,
        session_id: &str,
        party_id: &str,
        message_tag: &str,
    ) -> Result<Vec<ProtocolMessage>> {
        let messages = self
            .inner
            .download_messages(session_id, party_id, message_tag)
            .await?;
        Ok(messages
            .into_iter()
            .flat_map(|m| [m.clone(), m])
            .collect())
    }

    async fn delete_message(
        &self,
        session_id: &str,
        party_id: &str,
        hash: &str,
        message_tag: &str,
    ) -> Result<()> {
        self.inner
            .delete_message(session_id, party_id, hash, message_tag)
            .await
    }
}

// ============================================================================
// Co-signers
// ============================================================================

/// Co-signer that joins sessions and then never says a word
pub struct MuteCoSigner {
    pub party_id: PartyId,
    pub relay: Arc<dyn Relay>,
}

impl MuteCoSigner {
    async fn join(&self, session_id: &str) -> Result<()> {
        self.relay.register_session(session_id, &self.party_id).await
    }
}

#[async_trait]
impl CoSigner for MuteCoSigner {
    async fn join_keygen(&self, request: &KeygenRequest) -> Result<()> {
        self.join(&request.session_id).await
    }

    async fn join_keysign(&self, request: &KeysignRequest) -> Result<()> {
        self.join(&request.session).await
    }

    async fn join_reshare(&self, request: &ReshareRequest) -> Result<()> {
        self.join(&request.session_id).await
    }
}

/// Co-signer that refuses every invitation
pub struct RefusingCoSigner;

#[async_trait]
impl CoSigner for RefusingCoSigner {
    async fn join_keygen(&self, _: &KeygenRequest) -> Result<()> {
        Err(Error::CoSigner("returned 503: unavailable".into()))
    }

    async fn join_keysign(&self, _: &KeysignRequest) -> Result<()> {
        Err(Error::CoSigner("returned 503: unavailable".into()))
    }

    async fn join_reshare(&self, _: &ReshareRequest) -> Result<()> {
        Err(Error::CoSigner("returned 503: unavailable".into()))
    }
}

// ============================================================================
// Deployments
// ============================================================================

/// A device, the fast-vault server and the verifier on one in-memory relay
pub struct Deployment {
    pub relay: Arc<MemoryRelay>,
    pub ecdsa: Arc<SimulatedEngine>,
    pub eddsa: Arc<SimulatedEngine>,
    pub engines: Arc<Engines>,
    pub server: Arc<LocalCoSigner>,
    pub verifier: Arc<LocalCoSigner>,
    pub device: TssParty,
}

impl Deployment {
    pub fn seeded(seed: u64) -> Self {
        Self::build(
            Arc::new(SimulatedEngine::seeded(KeyType::Ecdsa, seed)),
            Arc::new(SimulatedEngine::seeded(KeyType::Eddsa, seed)),
        )
    }

    pub fn random() -> Self {
        Self::build(
            Arc::new(SimulatedEngine::new(KeyType::Ecdsa)),
            Arc::new(SimulatedEngine::new(KeyType::Eddsa)),
        )
    }

    fn build(ecdsa: Arc<SimulatedEngine>, eddsa: Arc<SimulatedEngine>) -> Self {
        let relay = Arc::new(MemoryRelay::new());
        let (tracked_ecdsa, _) = TrackedEngine::new(ecdsa.clone());
        let (tracked_eddsa, _) = TrackedEngine::new(eddsa.clone());
        let engines = Arc::new(Engines::new(Box::new(tracked_ecdsa), Box::new(tracked_eddsa)));

        let server = Arc::new(LocalCoSigner::new(
            "server",
            relay.clone(),
            engines.clone(),
            fast_config(),
        ));
        let verifier = Arc::new(LocalCoSigner::with_parties(
            vec!["verifier".to_string(), "plugin".to_string()],
            relay.clone(),
            engines.clone(),
            fast_config(),
        ));
        let device = TssParty::new("device", relay.clone(), engines.clone(), server.clone())
            .with_verifier(verifier.clone())
            .with_config(fast_config());

        Self {
            relay,
            ecdsa,
            eddsa,
            engines,
            server,
            verifier,
            device,
        }
    }

    pub async fn keygen(&self) -> LocalVault {
        let vault = self
            .device
            .keygen("test vault", "secret", "owner@example.com")
            .await
            .unwrap();
        self.server.wait_idle().await.unwrap();
        vault
    }

    pub fn engine(&self, key_type: KeyType) -> &SimulatedEngine {
        match key_type {
            KeyType::Ecdsa => &self.ecdsa,
            KeyType::Eddsa => &self.eddsa,
        }
    }

    /// Public key a signature over `derive_path` must verify against
    pub fn signing_key(&self, vault: &LocalVault, key_type: KeyType, derive_path: &[u8]) -> Vec<u8> {
        let engine = self.engine(key_type);
        let share = vault.keyshare_for(vault.public_key(key_type)).unwrap();
        let handle = engine.load_keyshare(&share.to_bytes().unwrap()).unwrap();
        let key = engine.signing_public_key(handle, derive_path).unwrap();
        engine.free_keyshare(handle).unwrap();
        key
    }

    pub fn live_handles(&self) -> usize {
        self.ecdsa.live_handles() + self.eddsa.live_handles()
    }
}

/// Hex digest of `seed`
pub fn digest(seed: u8) -> String {
    hex::encode([seed; 32])
}

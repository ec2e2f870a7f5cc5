//! Protocol engine capability
//!
//! The cryptographic engine is an injected dependency. The driver only
//! moves opaque byte blobs between it and the relay; it never looks inside
//! a setup message, a protocol message or a key share.
//!
//! Every operation is synchronous and may be CPU-bound. Handles returned by
//! the engine must be released by whoever acquired them; [`KeyshareGuard`]
//! and [`SessionGuard`] do that on every exit path.

use crate::{KeyType, PartyId, Result};
use std::fmt;
use tracing::warn;

pub mod simulated;

pub use simulated::SimulatedEngine;

/// Opaque engine resource handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(u64);

impl Handle {
    /// Wrap a raw engine handle
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw engine handle
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Kind of protocol session created from a setup message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    /// Distributed key generation
    Keygen,
    /// Threshold signing
    Sign,
    /// Quorum change (reshare)
    QuorumChange,
}

/// Capability set of a threshold protocol engine for one key type
pub trait ProtocolEngine: Send + Sync {
    /// Curve family this engine implements
    fn key_type(&self) -> KeyType;

    // ============ Key Shares ============

    /// Load a serialized key share
    fn load_keyshare(&self, bytes: &[u8]) -> Result<Handle>;

    /// Release a key share handle
    fn free_keyshare(&self, keyshare: Handle) -> Result<()>;

    /// Identifier of the key a share belongs to
    fn key_id(&self, keyshare: Handle) -> Result<Vec<u8>>;

    /// Public key of the shared key
    fn public_key(&self, keyshare: Handle) -> Result<Vec<u8>>;

    /// Chain code of the shared key, if the key type has one
    fn chain_code(&self, keyshare: Handle) -> Result<Option<Vec<u8>>>;

    // ============ Setup Messages ============

    /// Setup for a fresh key generation
    ///
    /// ECDSA shares produced from the setup carry `chain_code`; key types
    /// without a chain code ignore it.
    fn keygen_setup(
        &self,
        threshold: usize,
        parties: &[PartyId],
        chain_code: Option<&[u8]>,
    ) -> Result<Vec<u8>>;

    /// Setup for signing `payload` with the key `key_id`
    fn sign_setup(
        &self,
        key_id: &[u8],
        derive_path: &[u8],
        payload: &[u8],
        parties: &[PartyId],
    ) -> Result<Vec<u8>>;

    /// Setup for moving `keyshare`'s key from `old_indices` to `new_indices`
    fn quorum_change_setup(
        &self,
        keyshare: Handle,
        threshold: usize,
        parties: &[PartyId],
        old_indices: &[usize],
        new_indices: &[usize],
    ) -> Result<Vec<u8>>;

    // ============ Sessions ============

    /// Create the local party's session from a setup message
    fn session_from_setup(
        &self,
        kind: SessionKind,
        setup: &[u8],
        local_party_id: &str,
        keyshare: Option<Handle>,
    ) -> Result<Handle>;

    /// Next message ready to send; empty when nothing is ready right now
    fn next_outbound(&self, session: Handle) -> Result<Vec<u8>>;

    /// Receiver `index` of an outbound message; `None` ends enumeration
    fn receiver_of(&self, session: Handle, message: &[u8], index: usize)
    -> Result<Option<PartyId>>;

    /// Apply an inbound message; `true` exactly once, when finishing is possible
    fn apply_inbound(&self, session: Handle, message: &[u8]) -> Result<bool>;

    /// Produce the artifact of a finished session
    ///
    /// Signing sessions yield `r || s [|| v]`; keygen and quorum-change
    /// sessions yield the serialized new key share, or nothing for a party
    /// leaving the quorum.
    fn finish(&self, session: Handle) -> Result<Vec<u8>>;

    /// Release a session handle
    fn free_session(&self, session: Handle) -> Result<()>;
}

/// Engines for both key types
pub struct Engines {
    ecdsa: Box<dyn ProtocolEngine>,
    eddsa: Box<dyn ProtocolEngine>,
}

impl Engines {
    /// Pair up an ECDSA and an EdDSA engine
    pub fn new(ecdsa: Box<dyn ProtocolEngine>, eddsa: Box<dyn ProtocolEngine>) -> Self {
        Self { ecdsa, eddsa }
    }

    /// Simulated engines with fresh randomness
    pub fn simulated() -> Self {
        Self::new(
            Box::new(SimulatedEngine::new(KeyType::Ecdsa)),
            Box::new(SimulatedEngine::new(KeyType::Eddsa)),
        )
    }

    /// Simulated engines replaying a fixed seed
    pub fn simulated_seeded(seed: u64) -> Self {
        Self::new(
            Box::new(SimulatedEngine::seeded(KeyType::Ecdsa, seed)),
            Box::new(SimulatedEngine::seeded(KeyType::Eddsa, seed)),
        )
    }

    /// Engine for a key type
    pub fn get(&self, key_type: KeyType) -> &dyn ProtocolEngine {
        match key_type {
            KeyType::Ecdsa => self.ecdsa.as_ref(),
            KeyType::Eddsa => self.eddsa.as_ref(),
        }
    }
}

impl fmt::Debug for Engines {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engines").finish_non_exhaustive()
    }
}

/// Key share handle released on drop
pub struct KeyshareGuard<'a> {
    engine: &'a dyn ProtocolEngine,
    handle: Handle,
}

impl<'a> KeyshareGuard<'a> {
    /// Load a key share and guard the resulting handle
    pub fn load(engine: &'a dyn ProtocolEngine, bytes: &[u8]) -> Result<Self> {
        let handle = engine.load_keyshare(bytes)?;
        Ok(Self { engine, handle })
    }

    /// The guarded handle
    pub fn handle(&self) -> Handle {
        self.handle
    }
}

impl Drop for KeyshareGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.engine.free_keyshare(self.handle) {
            warn!(handle = %self.handle, error = %e, "Failed to free key share");
        }
    }
}

/// Session handle released on drop
pub struct SessionGuard<'a> {
    engine: &'a dyn ProtocolEngine,
    handle: Handle,
}

impl<'a> SessionGuard<'a> {
    /// Create a session from a setup message and guard the resulting handle
    pub fn create(
        engine: &'a dyn ProtocolEngine,
        kind: SessionKind,
        setup: &[u8],
        local_party_id: &str,
        keyshare: Option<Handle>,
    ) -> Result<Self> {
        let handle = engine.session_from_setup(kind, setup, local_party_id, keyshare)?;
        Ok(Self { engine, handle })
    }

    /// Engine owning the session
    pub fn engine(&self) -> &'a dyn ProtocolEngine {
        self.engine
    }

    /// The guarded handle
    pub fn handle(&self) -> Handle {
        self.handle
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.engine.free_session(self.handle) {
            warn!(handle = %self.handle, error = %e, "Failed to free session");
        }
    }
}

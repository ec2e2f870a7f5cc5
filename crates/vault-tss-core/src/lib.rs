//! # Vault TSS Core
//!
//! Client-side driver for relay-coordinated threshold signature sessions.
//!
//! ## Architecture
//!
//! This crate provides:
//! - **Encrypted transport**: AES-256-GCM framing of every protocol message
//!   and setup blob under a per-session key
//! - **Relay contract**: the store-and-forward calls parties use to find
//!   each other and exchange messages, plus an in-memory relay
//! - **Protocol engine capability**: the handle-based interface to the
//!   threshold engine, plus a simulated engine for local runs
//! - **Round driver**: the polling loop that pumps one engine session to
//!   completion over the relay
//! - **Orchestrators**: keygen, keysign and reshare on [`TssParty`]
//! - **Vault storage**: encrypted persistence of the resulting key shares
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vault_tss_core::{DriverConfig, Engines, KeyType, LocalCoSigner, MemoryRelay, TssParty};
//!
//! let relay = Arc::new(MemoryRelay::new());
//! let engines = Arc::new(Engines::simulated());
//! let server = Arc::new(LocalCoSigner::new("server", relay.clone(), engines.clone(), DriverConfig::default()));
//!
//! let device = TssParty::new("device", relay, engines, server);
//! let vault = device.keygen("main", "password", "me@example.com").await?;
//! let signatures = device
//!     .keysign(&vault, &[digest_hex], "m/44'/60'/0'/0/0", KeyType::Ecdsa, "password")
//!     .await?;
//! ```

pub mod config;
pub mod cosigner;
pub mod driver;
pub mod engine;
pub mod error;
pub mod keygen;
pub mod mpc;
pub mod party;
pub mod rendezvous;
pub mod sign;
pub mod storage;
pub mod transport;
pub mod types;
pub mod vault;

pub use config::{DriverConfig, ServiceConfig};
pub use cosigner::{CoSigner, KeygenRequest, KeysignRequest, LocalCoSigner, ReshareRequest};
pub use driver::{DriverState, DriverStats, RoundDriver};
pub use engine::{Engines, Handle, ProtocolEngine, SessionKind, SimulatedEngine};
pub use error::{Error, Result};
pub use keygen::{keygen_threshold, party_partition, reshare_threshold};
pub use mpc::{MemoryRelay, ProtocolMessage, Relay, RelayExt};
pub use party::TssParty;
pub use rendezvous::PartyRendezvous;
pub use storage::{EncryptedVault, FileVaultStore, MemoryVaultStore, VaultStore};
pub use transport::{EncryptedTransport, EncryptionKey};
pub use types::{
    EDDSA_MESSAGE_TAG, KeyShare, KeyType, MessageDigest, PartyId, SessionId, SigningResult,
};
pub use vault::{LIB_TYPE_DKLS, LocalVault};

/// Protocol version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

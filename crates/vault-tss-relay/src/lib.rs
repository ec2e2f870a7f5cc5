//! # Vault TSS HTTP adapters
//!
//! Network implementations of the collaborator contracts defined in
//! `vault-tss-core`:
//!
//! - [`HttpRelayClient`] implements [`vault_tss_core::Relay`] over the
//!   message router's REST API.
//! - [`FastVaultClient`] and [`VerifierClient`] implement
//!   [`vault_tss_core::CoSigner`].
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vault_tss_core::{DriverConfig, Engines, ServiceConfig, TssParty};
//! use vault_tss_relay::{FastVaultClient, HttpRelayClient, VerifierClient};
//!
//! let service = ServiceConfig::from_env();
//! let driver = DriverConfig::default();
//!
//! let party = TssParty::new(
//!     "device-1",
//!     Arc::new(HttpRelayClient::from_config(&service, &driver)?),
//!     Arc::new(engines),
//!     Arc::new(FastVaultClient::from_config(&service, &driver)?),
//! )
//! .with_verifier(Arc::new(
//!     VerifierClient::from_config(&service, &driver)?.with_auth_token(token),
//! ));
//! ```

pub mod client;
pub mod cosigner;
pub mod error;

pub use client::{HttpRelayClient, MESSAGE_ID_HEADER};
pub use cosigner::{FastVaultClient, VerifierClient};
pub use error::{RelayError, Result};

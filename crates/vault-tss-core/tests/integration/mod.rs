//! Integration tests module
//!
//! End-to-end orchestrator flows between a device and in-process
//! co-signers:
//! - Keygen
//! - Keysign
//! - Reshare

pub mod keygen_test;
pub mod keysign_test;

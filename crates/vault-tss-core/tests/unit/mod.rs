//! Unit tests module
//!
//! Components driven directly against the in-memory relay and the
//! simulated engine:
//! - Round driver
//! - In-process co-signer

pub mod driver_test;
pub mod cosigner_test;

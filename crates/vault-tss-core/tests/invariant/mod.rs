//! Invariant tests module
//!
//! Guarantees that must hold on success and failure paths alike.

pub mod handle_invariant;

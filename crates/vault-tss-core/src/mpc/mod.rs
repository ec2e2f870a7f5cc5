//! Relay coordination
//!
//! The `Relay` trait is the store-and-forward contract every party talks
//! through: session membership, the start signal, setup messages and the
//! per-party protocol message queues. Implementations exist for the HTTP
//! router (in `vault-tss-relay`) and for in-process simulation
//! ([`MemoryRelay`]).

use crate::{Error, PartyId, Result};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

pub use async_trait::async_trait;

pub mod memory;

pub use memory::MemoryRelay;

/// One encrypted protocol message as carried by the relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolMessage {
    /// Session the message belongs to
    pub session_id: String,
    /// Sending party
    pub from: PartyId,
    /// Receiving parties
    pub to: Vec<PartyId>,
    /// Encrypted, base64-framed payload
    pub body: String,
    /// Hex MD5 of the framed plaintext, used for dedup and deletion
    pub hash: String,
    /// Per-run send counter of the sender
    pub sequence_no: u64,
}

/// Relay contract consumed by the rendezvous, the round driver and the
/// orchestrators
///
/// Every call is a single request. Message tags separate sub-protocols that
/// share one session id; the empty tag is the default channel.
#[async_trait]
pub trait Relay: Send + Sync {
    /// Add a party to the session membership
    async fn register_session(&self, session_id: &str, party_id: &str) -> Result<()>;

    /// Current session membership in relay order
    async fn session_parties(&self, session_id: &str) -> Result<Vec<PartyId>>;

    /// Signal that the listed parties may begin exchanging
    async fn start_session(&self, session_id: &str, parties: &[PartyId]) -> Result<()>;

    /// Parties of a started session; empty if not started yet
    async fn started_parties(&self, session_id: &str) -> Result<Vec<PartyId>>;

    /// Mark the local party as done with the session
    async fn complete_session(&self, session_id: &str, party_id: &str) -> Result<()>;

    /// Publish the encrypted setup message for a tag
    async fn upload_setup_message(
        &self,
        session_id: &str,
        message_tag: &str,
        setup: &str,
    ) -> Result<()>;

    /// Fetch the encrypted setup message for a tag, if published
    async fn download_setup_message(
        &self,
        session_id: &str,
        message_tag: &str,
    ) -> Result<Option<String>>;

    /// Queue a protocol message for each of its receivers
    async fn send_message(&self, message_tag: &str, message: &ProtocolMessage) -> Result<()>;

    /// Messages currently queued for a party
    async fn download_messages(
        &self,
        session_id: &str,
        party_id: &str,
        message_tag: &str,
    ) -> Result<Vec<ProtocolMessage>>;

    /// Acknowledge consumption of a message
    async fn delete_message(
        &self,
        session_id: &str,
        party_id: &str,
        hash: &str,
        message_tag: &str,
    ) -> Result<()>;
}

/// Deadline-scoped relay calls
#[async_trait]
pub trait RelayExt: Relay {
    /// Download with an absolute deadline
    async fn download_messages_until(
        &self,
        session_id: &str,
        party_id: &str,
        message_tag: &str,
        deadline: Instant,
    ) -> Result<Vec<ProtocolMessage>>;

    /// Send with an absolute deadline
    async fn send_message_until(
        &self,
        message_tag: &str,
        message: &ProtocolMessage,
        deadline: Instant,
    ) -> Result<()>;
}

#[async_trait]
impl<R: Relay + ?Sized> RelayExt for R {
    async fn download_messages_until(
        &self,
        session_id: &str,
        party_id: &str,
        message_tag: &str,
        deadline: Instant,
    ) -> Result<Vec<ProtocolMessage>> {
        tokio::time::timeout_at(
            deadline,
            self.download_messages(session_id, party_id, message_tag),
        )
        .await
        .map_err(|_| Error::Relay("download_messages timed out".to_string()))?
    }

    async fn send_message_until(
        &self,
        message_tag: &str,
        message: &ProtocolMessage,
        deadline: Instant,
    ) -> Result<()> {
        tokio::time::timeout_at(deadline, self.send_message(message_tag, message))
            .await
            .map_err(|_| Error::Relay("send_message timed out".to_string()))?
    }
}

//! In-memory relay for simulation and tests
//!
//! Mirrors the router's behavior closely enough that every party of a
//! simulated session can run the same code it would run against the HTTP
//! relay: membership in registration order, a started-party list, setup
//! messages keyed by tag, and per-party queues that keep messages until they
//! are deleted.

use super::{ProtocolMessage, Relay, async_trait};
use crate::{Error, PartyId, Result};
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Queue key: (session, tag, receiving party)
type QueueKey = (String, String, PartyId);

/// In-memory message relay
///
/// Cloning yields a handle onto the same shared state, so each simulated
/// party can own its own copy.
#[derive(Debug, Clone, Default)]
pub struct MemoryRelay {
    /// session -> parties in registration order
    sessions: Arc<DashMap<String, Vec<PartyId>>>,
    /// session -> started party list
    started: Arc<DashMap<String, Vec<PartyId>>>,
    /// session -> parties that completed
    completed: Arc<DashMap<String, Vec<PartyId>>>,
    /// (session, tag) -> encrypted setup message
    setups: Arc<DashMap<(String, String), String>>,
    /// (session, tag, party) -> queued messages
    queues: Arc<DashMap<QueueKey, Vec<ProtocolMessage>>>,
    /// Refuse deletions, to exercise best-effort acknowledgement
    reject_deletes: Arc<AtomicBool>,
}

impl MemoryRelay {
    /// Create an empty relay
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `delete_message` fail
    pub fn set_reject_deletes(&self, reject: bool) {
        self.reject_deletes.store(reject, Ordering::SeqCst);
    }

    /// Number of messages queued for a party under a tag
    pub fn pending_count(&self, session_id: &str, party_id: &str, message_tag: &str) -> usize {
        self.queues
            .get(&queue_key(session_id, message_tag, party_id))
            .map(|q| q.len())
            .unwrap_or(0)
    }

    /// Ids of every registered session, sorted
    pub fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Tags with a published setup message in a session, sorted
    pub fn setup_tags(&self, session_id: &str) -> Vec<String> {
        let mut tags: Vec<String> = self
            .setups
            .iter()
            .filter(|e| e.key().0 == session_id)
            .map(|e| e.key().1.clone())
            .collect();
        tags.sort();
        tags
    }

    /// Parties that reported completion
    pub fn completed_parties(&self, session_id: &str) -> Vec<PartyId> {
        self.completed
            .get(session_id)
            .map(|c| c.value().clone())
            .unwrap_or_default()
    }

    /// Queue a message directly, bypassing sender bookkeeping
    pub fn inject(&self, message_tag: &str, message: ProtocolMessage) {
        for receiver in &message.to {
            self.queues
                .entry(queue_key(&message.session_id, message_tag, receiver))
                .or_default()
                .push(message.clone());
        }
    }

    /// Drop all state
    pub fn clear(&self) {
        self.sessions.clear();
        self.started.clear();
        self.completed.clear();
        self.setups.clear();
        self.queues.clear();
    }
}

fn queue_key(session_id: &str, message_tag: &str, party_id: &str) -> QueueKey {
    (
        session_id.to_string(),
        message_tag.to_string(),
        party_id.to_string(),
    )
}

#[async_trait]
impl Relay for MemoryRelay {
    async fn register_session(&self, session_id: &str, party_id: &str) -> Result<()> {
        let mut parties = self.sessions.entry(session_id.to_string()).or_default();
        if !parties.iter().any(|p| p == party_id) {
            parties.push(party_id.to_string());
        }
        Ok(())
    }

    async fn session_parties(&self, session_id: &str) -> Result<Vec<PartyId>> {
        Ok(self
            .sessions
            .get(session_id)
            .map(|p| p.value().clone())
            .unwrap_or_default())
    }

    async fn start_session(&self, session_id: &str, parties: &[PartyId]) -> Result<()> {
        if parties.is_empty() {
            return Err(Error::Relay("cannot start a session with no parties".into()));
        }
        self.started.insert(session_id.to_string(), parties.to_vec());
        Ok(())
    }

    async fn started_parties(&self, session_id: &str) -> Result<Vec<PartyId>> {
        Ok(self
            .started
            .get(session_id)
            .map(|p| p.value().clone())
            .unwrap_or_default())
    }

    async fn complete_session(&self, session_id: &str, party_id: &str) -> Result<()> {
        let mut done = self.completed.entry(session_id.to_string()).or_default();
        if !done.iter().any(|p| p == party_id) {
            done.push(party_id.to_string());
        }
        Ok(())
    }

    async fn upload_setup_message(
        &self,
        session_id: &str,
        message_tag: &str,
        setup: &str,
    ) -> Result<()> {
        self.setups.insert(
            (session_id.to_string(), message_tag.to_string()),
            setup.to_string(),
        );
        Ok(())
    }

    async fn download_setup_message(
        &self,
        session_id: &str,
        message_tag: &str,
    ) -> Result<Option<String>> {
        Ok(self
            .setups
            .get(&(session_id.to_string(), message_tag.to_string()))
            .map(|s| s.value().clone()))
    }

    async fn send_message(&self, message_tag: &str, message: &ProtocolMessage) -> Result<()> {
        if message.to.is_empty() {
            return Err(Error::Relay("message has no receivers".into()));
        }
        self.inject(message_tag, message.clone());
        Ok(())
    }

    async fn download_messages(
        &self,
        session_id: &str,
        party_id: &str,
        message_tag: &str,
    ) -> Result<Vec<ProtocolMessage>> {
        Ok(self
            .queues
            .get(&queue_key(session_id, message_tag, party_id))
            .map(|q| q.value().clone())
            .unwrap_or_default())
    }

    async fn delete_message(
        &self,
        session_id: &str,
        party_id: &str,
        hash: &str,
        message_tag: &str,
    ) -> Result<()> {
        if self.reject_deletes.load(Ordering::SeqCst) {
            return Err(Error::Relay(format!("delete of {} refused", hash)));
        }
        if let Some(mut queue) = self
            .queues
            .get_mut(&queue_key(session_id, message_tag, party_id))
        {
            queue.retain(|m| m.hash != hash);
        }
        Ok(())
    }
}

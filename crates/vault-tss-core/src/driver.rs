//! Protocol round driver
//!
//! Runs one engine session to completion over the relay:
//!
//! 1. Drain everything the engine has to say, encrypt each message once and
//!    send one relay message per receiver.
//! 2. Poll the relay for messages addressed to the local party, decrypt and
//!    apply them, and drain the engine again after every successful apply.
//! 3. Stop when the engine reports it can finish, or when the deadline
//!    passes.
//!
//! A run moves through `Setup -> Exchanging -> Finished | TimedOut | Failed`.
//! Messages that fail to decrypt are skipped and looked at again on the next
//! poll; messages the engine rejects are dropped for the rest of the run.

use crate::config::DriverConfig;
use crate::engine::SessionGuard;
use crate::mpc::{ProtocolMessage, Relay, RelayExt};
use crate::transport::{EncryptedTransport, body_hash, frame};
use crate::{Error, PartyId, Result};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Lifecycle of a driver run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// Not started
    Setup,
    /// Exchanging messages
    Exchanging,
    /// Engine artifact produced
    Finished,
    /// Deadline passed
    TimedOut,
    /// Aborted by a fatal error
    Failed,
}

/// Counters of one driver run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverStats {
    /// Relay messages sent
    pub sent: usize,
    /// Inbound messages applied by the engine
    pub applied: usize,
    /// Inbound messages skipped as already applied
    pub duplicates: usize,
    /// Inbound messages that failed to decrypt
    pub undecryptable: usize,
    /// Inbound messages the engine rejected
    pub rejected: usize,
}

/// Drives one engine session over the relay
pub struct RoundDriver {
    relay: Arc<dyn Relay>,
    transport: EncryptedTransport,
    session_id: String,
    local_party_id: PartyId,
    message_tag: String,
    stage: String,
    config: DriverConfig,
    state: DriverState,
    stats: DriverStats,
    sequence_no: u64,
}

impl RoundDriver {
    /// Create a driver for the local party of a relay session
    pub fn new(
        relay: Arc<dyn Relay>,
        transport: EncryptedTransport,
        session_id: impl Into<String>,
        local_party_id: impl Into<PartyId>,
        config: DriverConfig,
    ) -> Self {
        Self {
            relay,
            transport,
            session_id: session_id.into(),
            local_party_id: local_party_id.into(),
            message_tag: String::new(),
            stage: "protocol".to_string(),
            config,
            state: DriverState::Setup,
            stats: DriverStats::default(),
            sequence_no: 0,
        }
    }

    /// Scope the run to a relay message tag
    pub fn with_message_tag(mut self, message_tag: impl Into<String>) -> Self {
        self.message_tag = message_tag.into();
        self
    }

    /// Label used in errors and logs
    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = stage.into();
        self
    }

    /// Current state
    pub fn state(&self) -> DriverState {
        self.state
    }

    /// Counters of the run so far
    pub fn stats(&self) -> &DriverStats {
        &self.stats
    }

    /// Run the session to completion and return the engine artifact
    ///
    /// The session is consumed and released on every exit path.
    #[instrument(skip_all, fields(session = %self.session_id, party = %self.local_party_id, tag = %self.message_tag, stage = %self.stage))]
    pub async fn run(&mut self, session: SessionGuard<'_>) -> Result<Vec<u8>> {
        let deadline = Instant::now() + self.config.protocol_timeout;
        self.state = DriverState::Exchanging;

        let result = self.exchange(&session, deadline).await;
        self.state = match &result {
            Ok(_) => DriverState::Finished,
            Err(Error::ProtocolTimeout { .. }) => DriverState::TimedOut,
            Err(_) => DriverState::Failed,
        };

        match &result {
            Ok(artifact) => info!(
                bytes = artifact.len(),
                sent = self.stats.sent,
                applied = self.stats.applied,
                "Protocol finished"
            ),
            Err(e) => warn!(error = %e, stats = ?self.stats, "Protocol aborted"),
        }
        result
    }

    async fn exchange(&mut self, session: &SessionGuard<'_>, deadline: Instant) -> Result<Vec<u8>> {
        let engine = session.engine();
        let handle = session.handle();
        let mut applied: HashSet<String> = HashSet::new();
        let mut rejected: HashSet<String> = HashSet::new();

        self.drain_outbound(session, deadline).await?;

        loop {
            if Instant::now() >= deadline {
                return Err(self.timeout());
            }

            let messages = match self
                .relay
                .download_messages_until(
                    &self.session_id,
                    &self.local_party_id,
                    &self.message_tag,
                    deadline,
                )
                .await
            {
                Ok(messages) => messages,
                Err(e) => {
                    warn!(error = %e, "Failed to download messages");
                    Vec::new()
                }
            };

            let mut progressed = false;
            for message in messages {
                if message.from == self.local_party_id {
                    continue;
                }
                if applied.contains(&message.hash) {
                    self.stats.duplicates += 1;
                    continue;
                }
                if rejected.contains(&message.hash) {
                    continue;
                }

                let payload = match self.transport.open(&message.body) {
                    Ok(payload) => payload,
                    Err(e) => {
                        self.stats.undecryptable += 1;
                        debug!(from = %message.from, hash = %message.hash, error = %e, "Skipping undecryptable message");
                        continue;
                    }
                };

                let finished = match engine.apply_inbound(handle, &payload) {
                    Ok(finished) => finished,
                    Err(e) => {
                        self.stats.rejected += 1;
                        warn!(from = %message.from, hash = %message.hash, error = %e, "Engine rejected message");
                        rejected.insert(message.hash);
                        continue;
                    }
                };

                self.stats.applied += 1;
                progressed = true;
                applied.insert(message.hash.clone());

                if let Err(e) = self
                    .relay
                    .delete_message(
                        &self.session_id,
                        &self.local_party_id,
                        &message.hash,
                        &self.message_tag,
                    )
                    .await
                {
                    warn!(hash = %message.hash, error = %e, "Failed to delete message from relay");
                }

                self.drain_outbound(session, deadline).await?;

                if finished {
                    return engine.finish(handle).map_err(|e| Error::EngineFinishFailed {
                        session_id: self.session_id.clone(),
                        reason: e.to_string(),
                    });
                }
            }

            if !progressed {
                let wake = (Instant::now() + self.config.poll_interval).min(deadline);
                tokio::time::sleep_until(wake).await;
            }
        }
    }

    /// Send everything the engine has ready right now
    async fn drain_outbound(&mut self, session: &SessionGuard<'_>, deadline: Instant) -> Result<()> {
        let engine = session.engine();
        let handle = session.handle();

        loop {
            let outbound = engine.next_outbound(handle)?;
            if outbound.is_empty() {
                return Ok(());
            }

            let mut receivers = Vec::new();
            while let Some(receiver) = engine.receiver_of(handle, &outbound, receivers.len())? {
                receivers.push(receiver);
            }
            if receivers.is_empty() {
                debug!("Outbound message has no receivers");
                continue;
            }

            let framed = frame(&outbound);
            let hash = body_hash(&framed);
            let body = self.transport.encrypt(&framed)?;

            for receiver in receivers {
                let message = ProtocolMessage {
                    session_id: self.session_id.clone(),
                    from: self.local_party_id.clone(),
                    to: vec![receiver],
                    body: body.clone(),
                    hash: hash.clone(),
                    sequence_no: self.sequence_no,
                };
                self.send(&message, deadline).await?;
                self.sequence_no += 1;
                self.stats.sent += 1;
            }
        }
    }

    /// Send one message, retrying transient relay failures until the deadline
    async fn send(&self, message: &ProtocolMessage, deadline: Instant) -> Result<()> {
        loop {
            match self
                .relay
                .send_message_until(&self.message_tag, message, deadline)
                .await
            {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(to = ?message.to, error = %e, "Failed to send message");
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(self.timeout());
                    }
                    tokio::time::sleep_until((now + self.config.poll_interval).min(deadline)).await;
                }
            }
        }
    }

    fn timeout(&self) -> Error {
        Error::ProtocolTimeout {
            session_id: self.session_id.clone(),
            stage: self.stage.clone(),
        }
    }
}

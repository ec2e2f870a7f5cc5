//! Party rendezvous
//!
//! Polls the relay's session views until enough parties have joined, the
//! session has been started, or a setup message has been published. The
//! party list returned by [`PartyRendezvous::wait_for_parties`] is the relay's
//! order, untouched, so every participant derives the same indices from it.

use crate::config::DriverConfig;
use crate::mpc::Relay;
use crate::{Error, PartyId, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

/// Deadline-bounded waits on relay session state
#[derive(Clone)]
pub struct PartyRendezvous {
    relay: Arc<dyn Relay>,
    timeout: Duration,
    poll_interval: Duration,
}

impl PartyRendezvous {
    /// Create a rendezvous over a relay
    pub fn new(relay: Arc<dyn Relay>, timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            relay,
            timeout,
            poll_interval,
        }
    }

    /// Use the rendezvous timing of a driver configuration
    pub fn from_config(relay: Arc<dyn Relay>, config: &DriverConfig) -> Self {
        Self::new(relay, config.rendezvous_timeout, config.poll_interval)
    }

    /// Wait until at least `expected` parties joined; returns them in relay order
    #[instrument(skip(self))]
    pub async fn wait_for_parties(&self, session_id: &str, expected: usize) -> Result<Vec<PartyId>> {
        let deadline = Instant::now() + self.timeout;
        let mut joined = 0;

        loop {
            match self.relay.session_parties(session_id).await {
                Ok(parties) => {
                    joined = parties.len();
                    if joined >= expected {
                        debug!(parties = ?parties, "All parties joined");
                        return Ok(parties);
                    }
                }
                Err(e) => warn!(error = %e, "Failed to read session parties"),
            }

            if !self.pause(deadline).await {
                return Err(Error::RendezvousTimeout {
                    session_id: session_id.to_string(),
                    expected,
                    joined,
                });
            }
        }
    }

    /// Wait until the session is started with `party_id` among its parties
    #[instrument(skip(self))]
    pub async fn wait_for_start(&self, session_id: &str, party_id: &str) -> Result<Vec<PartyId>> {
        let deadline = Instant::now() + self.timeout;

        loop {
            match self.relay.started_parties(session_id).await {
                Ok(parties) if parties.iter().any(|p| p == party_id) => return Ok(parties),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Failed to read started parties"),
            }

            if !self.pause(deadline).await {
                return Err(Error::ProtocolTimeout {
                    session_id: session_id.to_string(),
                    stage: "session start".to_string(),
                });
            }
        }
    }

    /// Wait until the setup message for `message_tag` is published
    #[instrument(skip(self))]
    pub async fn wait_for_setup_message(&self, session_id: &str, message_tag: &str) -> Result<String> {
        let deadline = Instant::now() + self.timeout;

        loop {
            match self.relay.download_setup_message(session_id, message_tag).await {
                Ok(Some(setup)) => return Ok(setup),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Failed to download setup message"),
            }

            if !self.pause(deadline).await {
                return Err(Error::ProtocolTimeout {
                    session_id: session_id.to_string(),
                    stage: format!("setup message '{}'", message_tag),
                });
            }
        }
    }

    /// Sleep one poll interval, or return false once the deadline has passed
    async fn pause(&self, deadline: Instant) -> bool {
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        tokio::time::sleep_until((now + self.poll_interval).min(deadline)).await;
        true
    }
}

//! Driver and service configuration
//!
//! Everything the driver needs is passed in explicitly; nothing is read from
//! process-wide state after construction.

use std::time::Duration;

/// Default relay router URL
pub const DEFAULT_RELAY_URL: &str = "https://api.vultisig.com/router";

/// Default fast-vault co-signer URL
pub const DEFAULT_FAST_VAULT_URL: &str = "https://api.vultisig.com";

/// Default verifier URL
pub const DEFAULT_VERIFIER_URL: &str = "http://localhost:8080";

/// Timing configuration for rendezvous and round driving
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Wall-clock bound on one round-driver run
    pub protocol_timeout: Duration,
    /// Sleep between relay polls that returned nothing new
    pub poll_interval: Duration,
    /// Bound on waiting for parties to join a session
    pub rendezvous_timeout: Duration,
    /// Bound on any single relay or co-signer request
    pub request_timeout: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            protocol_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_millis(100),
            rendezvous_timeout: Duration::from_secs(120),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl DriverConfig {
    /// Set the protocol deadline
    pub fn with_protocol_timeout(mut self, timeout: Duration) -> Self {
        self.protocol_timeout = timeout;
        self
    }

    /// Set the polling backoff
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the rendezvous deadline
    pub fn with_rendezvous_timeout(mut self, timeout: Duration) -> Self {
        self.rendezvous_timeout = timeout;
        self
    }

    /// Set the per-request bound
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Endpoints of the external collaborators
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Relay router base URL
    pub relay_url: String,
    /// Fast-vault co-signer base URL
    pub fast_vault_url: String,
    /// Verifier base URL
    pub verifier_url: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.to_string(),
            fast_vault_url: DEFAULT_FAST_VAULT_URL.to_string(),
            verifier_url: DEFAULT_VERIFIER_URL.to_string(),
        }
    }
}

impl ServiceConfig {
    /// Environment variable overriding the relay URL
    pub const RELAY_URL_VAR: &'static str = "VAULT_TSS_RELAY_URL";
    /// Environment variable overriding the fast-vault URL
    pub const FAST_VAULT_URL_VAR: &'static str = "VAULT_TSS_FAST_VAULT_URL";
    /// Environment variable overriding the verifier URL
    pub const VERIFIER_URL_VAR: &'static str = "VAULT_TSS_VERIFIER_URL";

    /// Defaults overridden by the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by an arbitrary lookup; empty values are ignored
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        Self {
            relay_url: get(Self::RELAY_URL_VAR, DEFAULT_RELAY_URL),
            fast_vault_url: get(Self::FAST_VAULT_URL_VAR, DEFAULT_FAST_VAULT_URL),
            verifier_url: get(Self::VERIFIER_URL_VAR, DEFAULT_VERIFIER_URL),
        }
    }

    /// Set the relay URL
    pub fn with_relay_url(mut self, url: impl Into<String>) -> Self {
        self.relay_url = url.into();
        self
    }

    /// Set the fast-vault URL
    pub fn with_fast_vault_url(mut self, url: impl Into<String>) -> Self {
        self.fast_vault_url = url.into();
        self
    }

    /// Set the verifier URL
    pub fn with_verifier_url(mut self, url: impl Into<String>) -> Self {
        self.verifier_url = url.into();
        self
    }
}

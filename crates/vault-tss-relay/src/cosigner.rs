//! HTTP clients for the co-signing services
//!
//! The fast-vault server takes part in keygen, keysign and reshare. The
//! verifier only joins reshares and authenticates callers with a bearer
//! token.

use crate::client::check;
use crate::{RelayError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, instrument};
use vault_tss_core::{
    CoSigner, DriverConfig, KeygenRequest, KeysignRequest, ReshareRequest, ServiceConfig,
};

fn http_client(request_timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(request_timeout)
        .build()
        .map_err(|e| RelayError::Internal(format!("failed to build HTTP client: {}", e)))
}

/// Map any adapter failure to the co-signer error the orchestrators expect
fn cosigner_error(err: RelayError) -> vault_tss_core::Error {
    vault_tss_core::Error::CoSigner(err.to_string())
}

// ============ Fast Vault ============

/// Client for the fast-vault server
#[derive(Debug, Clone)]
pub struct FastVaultClient {
    base_url: String,
    client: Client,
}

impl FastVaultClient {
    /// Create a client for the server at `base_url`
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: http_client(request_timeout)?,
        })
    }

    /// Create a client from service and timing configuration
    pub fn from_config(service: &ServiceConfig, driver: &DriverConfig) -> Result<Self> {
        Self::new(&service.fast_vault_url, driver.request_timeout)
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post<T: Serialize + Sync>(&self, path: &str, body: &T) -> Result<()> {
        let response = self.client.post(self.url(path)).json(body).send().await?;
        check(response).await?;
        Ok(())
    }
}

#[async_trait]
impl CoSigner for FastVaultClient {
    #[instrument(skip(self, request), fields(session = %request.session_id))]
    async fn join_keygen(&self, request: &KeygenRequest) -> vault_tss_core::Result<()> {
        self.post("/vault/create", request)
            .await
            .map_err(cosigner_error)?;
        debug!("Fast vault joined keygen");
        Ok(())
    }

    #[instrument(skip(self, request), fields(session = %request.session))]
    async fn join_keysign(&self, request: &KeysignRequest) -> vault_tss_core::Result<()> {
        self.post("/vault/sign", request)
            .await
            .map_err(cosigner_error)?;
        debug!(messages = request.messages.len(), "Fast vault joined keysign");
        Ok(())
    }

    #[instrument(skip(self, request), fields(session = %request.session_id))]
    async fn join_reshare(&self, request: &ReshareRequest) -> vault_tss_core::Result<()> {
        self.post("/vault/reshare", request)
            .await
            .map_err(cosigner_error)?;
        debug!("Fast vault joined reshare");
        Ok(())
    }
}

// ============ Verifier ============

/// Client for the verifier service
#[derive(Debug, Clone)]
pub struct VerifierClient {
    base_url: String,
    auth_token: Option<String>,
    client: Client,
}

impl VerifierClient {
    /// Create a client for the verifier at `base_url`
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_token: None,
            client: http_client(request_timeout)?,
        })
    }

    /// Create a client from service and timing configuration
    pub fn from_config(service: &ServiceConfig, driver: &DriverConfig) -> Result<Self> {
        Self::new(&service.verifier_url, driver.request_timeout)
    }

    /// Send `Authorization: Bearer <token>` with every request
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    fn reshare_request(&self, request: &ReshareRequest) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .post(format!("{}/vault/reshare", self.base_url))
            .json(request);
        match &self.auth_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

#[async_trait]
impl CoSigner for VerifierClient {
    async fn join_keygen(&self, _request: &KeygenRequest) -> vault_tss_core::Result<()> {
        Err(cosigner_error(RelayError::Unsupported(
            "verifier does not join keygen".to_string(),
        )))
    }

    async fn join_keysign(&self, _request: &KeysignRequest) -> vault_tss_core::Result<()> {
        Err(cosigner_error(RelayError::Unsupported(
            "verifier does not join keysign".to_string(),
        )))
    }

    #[instrument(skip(self, request), fields(session = %request.session_id, plugin = ?request.plugin_id))]
    async fn join_reshare(&self, request: &ReshareRequest) -> vault_tss_core::Result<()> {
        let response = self
            .reshare_request(request)
            .send()
            .await
            .map_err(|e| cosigner_error(e.into()))?;
        check(response).await.map_err(cosigner_error)?;
        debug!("Verifier joined reshare");
        Ok(())
    }
}

//! HTTP client for the message relay
//!
//! Speaks the router's REST API. Sub-protocol tags travel in the
//! `message_id` header; an empty tag sends no header.

use crate::{RelayError, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;
use vault_tss_core::{DriverConfig, PartyId, ProtocolMessage, Relay, ServiceConfig};

/// Header carrying the sub-protocol tag
pub const MESSAGE_ID_HEADER: &str = "message_id";

/// Relay client over HTTP
#[derive(Debug, Clone)]
pub struct HttpRelayClient {
    base_url: String,
    client: Client,
}

impl HttpRelayClient {
    /// Create a client for the relay at `base_url`
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| RelayError::Internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Create a client from service and timing configuration
    pub fn from_config(service: &ServiceConfig, driver: &DriverConfig) -> Result<Self> {
        Self::new(&service.relay_url, driver.request_timeout)
    }

    /// Relay base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> String {
        let mut url = self.base_url.clone();
        for segment in segments {
            url.push('/');
            url.push_str(segment);
        }
        url
    }

    async fn post_json<T: Serialize + ?Sized>(
        &self,
        segments: &[&str],
        body: &T,
        message_tag: &str,
    ) -> Result<()> {
        let request = with_tag(self.client.post(self.endpoint(segments)), message_tag).json(body);
        check(request.send().await?).await?;
        Ok(())
    }

    /// GET that maps 404 to `None`
    async fn get(&self, segments: &[&str], message_tag: &str) -> Result<Option<Response>> {
        let request = with_tag(self.client.get(self.endpoint(segments)), message_tag);
        let response = request.send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(check(response).await?))
    }

    async fn get_parties(&self, segments: &[&str]) -> Result<Vec<PartyId>> {
        match self.get(segments, "").await? {
            Some(response) => Ok(response.json().await?),
            None => Ok(Vec::new()),
        }
    }
}

/// Attach the tag header when the tag is non-empty
pub(crate) fn with_tag(request: RequestBuilder, message_tag: &str) -> RequestBuilder {
    if message_tag.is_empty() {
        request
    } else {
        request.header(MESSAGE_ID_HEADER, message_tag)
    }
}

/// Turn a non-success response into [`RelayError::Status`]
pub(crate) async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(RelayError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl Relay for HttpRelayClient {
    async fn register_session(&self, session_id: &str, party_id: &str) -> vault_tss_core::Result<()> {
        self.post_json(&[session_id], &[party_id], "").await?;
        debug!(session = %session_id, party = %party_id, "Registered with relay");
        Ok(())
    }

    async fn session_parties(&self, session_id: &str) -> vault_tss_core::Result<Vec<PartyId>> {
        Ok(self.get_parties(&[session_id]).await?)
    }

    async fn start_session(&self, session_id: &str, parties: &[PartyId]) -> vault_tss_core::Result<()> {
        Ok(self.post_json(&["start", session_id], parties, "").await?)
    }

    async fn started_parties(&self, session_id: &str) -> vault_tss_core::Result<Vec<PartyId>> {
        Ok(self.get_parties(&["start", session_id]).await?)
    }

    async fn complete_session(&self, session_id: &str, party_id: &str) -> vault_tss_core::Result<()> {
        Ok(self
            .post_json(&["complete", session_id], &[party_id], "")
            .await?)
    }

    async fn upload_setup_message(
        &self,
        session_id: &str,
        message_tag: &str,
        setup: &str,
    ) -> vault_tss_core::Result<()> {
        let request = with_tag(
            self.client.post(self.endpoint(&["setup-message", session_id])),
            message_tag,
        )
        .body(setup.to_string());
        check(request.send().await.map_err(RelayError::from)?).await?;
        Ok(())
    }

    async fn download_setup_message(
        &self,
        session_id: &str,
        message_tag: &str,
    ) -> vault_tss_core::Result<Option<String>> {
        match self.get(&["setup-message", session_id], message_tag).await? {
            Some(response) => Ok(Some(response.text().await.map_err(RelayError::from)?)),
            None => Ok(None),
        }
    }

    async fn send_message(&self, message_tag: &str, message: &ProtocolMessage) -> vault_tss_core::Result<()> {
        Ok(self
            .post_json(&["message", &message.session_id], message, message_tag)
            .await?)
    }

    async fn download_messages(
        &self,
        session_id: &str,
        party_id: &str,
        message_tag: &str,
    ) -> vault_tss_core::Result<Vec<ProtocolMessage>> {
        match self.get(&["message", session_id, party_id], message_tag).await? {
            Some(response) => Ok(response.json().await.map_err(RelayError::from)?),
            None => Ok(Vec::new()),
        }
    }

    async fn delete_message(
        &self,
        session_id: &str,
        party_id: &str,
        hash: &str,
        message_tag: &str,
    ) -> vault_tss_core::Result<()> {
        let request = with_tag(
            self.client
                .delete(self.endpoint(&["message", session_id, party_id, hash])),
            message_tag,
        );
        check(request.send().await.map_err(RelayError::from)?).await?;
        Ok(())
    }
}

//! Bearer tokens for callback requests.

use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

use crate::config::TokenSourceConfig;
use crate::error::AuthError;

const METADATA_TIMEOUT: Duration = Duration::from_secs(10);

/// Issues short-lived tokens for an audience
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    async fn issue(&self, audience: &str) -> Result<String, AuthError>;
}

/// Identity tokens from the Google metadata server (Cloud Run, GCE, GKE)
pub struct MetadataTokenIssuer {
    client: Client,
    endpoint: String,
}

impl MetadataTokenIssuer {
    pub fn new(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl TokenIssuer for MetadataTokenIssuer {
    async fn issue(&self, audience: &str) -> Result<String, AuthError> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("audience", audience), ("format", "full")])
            .header("Metadata-Flavor", "Google")
            .timeout(METADATA_TIMEOUT)
            .send()
            .await
            .map_err(|e| AuthError::Transport {
                endpoint: self.endpoint.clone(),
                source: e,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::Status {
                status: status.as_u16(),
            });
        }

        let token = response.text().await.map_err(|e| AuthError::Transport {
            endpoint: self.endpoint.clone(),
            source: e,
        })?;

        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::EmptyToken);
        }

        Ok(token.to_string())
    }
}

/// A fixed token, for local development against a test webhook
pub struct StaticTokenIssuer {
    token: String,
}

impl StaticTokenIssuer {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenIssuer for StaticTokenIssuer {
    async fn issue(&self, _audience: &str) -> Result<String, AuthError> {
        if self.token.is_empty() {
            return Err(AuthError::EmptyToken);
        }
        Ok(self.token.clone())
    }
}

/// Build the issuer selected in configuration
pub fn issuer_from_config(client: Client, config: &TokenSourceConfig) -> Arc<dyn TokenIssuer> {
    match config {
        TokenSourceConfig::Metadata { endpoint } => {
            Arc::new(MetadataTokenIssuer::new(client, endpoint.clone()))
        }
        TokenSourceConfig::Static { token } => Arc::new(StaticTokenIssuer::new(token.clone())),
    }
}

//! Document fetcher: resolves a document reference (signed URL) to bytes.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use reqwest::{Client, StatusCode, Url};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::FetchConfig;
use crate::error::FetchError;

/// Resolves a document reference to its raw bytes
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    async fn fetch(&self, reference: &str) -> Result<Bytes, FetchError>;
}

/// HTTP(S) fetcher with retry on gateway errors and transport failures
pub struct HttpDocumentFetcher {
    client: Client,
    config: FetchConfig,
}

impl HttpDocumentFetcher {
    pub fn new(client: Client, config: FetchConfig) -> Self {
        Self { client, config }
    }

    async fn fetch_once(&self, url: &Url) -> Result<Bytes, FetchError> {
        let response = self
            .client
            .get(url.clone())
            .timeout(self.config.request_timeout())
            .send()
            .await
            .map_err(FetchError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
            });
        }

        let max = self.config.max_document_size_bytes;
        if let Some(size) = response.content_length().filter(|size| *size > max) {
            return Err(FetchError::TooLarge { size, max });
        }

        // Content-Length may be absent (chunked), so the limit is enforced while reading
        let mut body = BytesMut::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(FetchError::Transport)?;
            let size = (body.len() + chunk.len()) as u64;
            if size > max {
                return Err(FetchError::TooLarge { size, max });
            }
            body.extend_from_slice(&chunk);
        }

        Ok(body.freeze())
    }

    /// Wait before retry `attempt + 1`: `backoff_ms * 2^attempt`, saturating
    fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.config.backoff_ms).saturating_mul(1u32 << attempt.min(16))
    }
}

fn is_retryable(error: &FetchError) -> bool {
    match error {
        FetchError::Status { status } => matches!(
            StatusCode::from_u16(*status),
            Ok(StatusCode::INTERNAL_SERVER_ERROR
                | StatusCode::BAD_GATEWAY
                | StatusCode::SERVICE_UNAVAILABLE
                | StatusCode::GATEWAY_TIMEOUT)
        ),
        FetchError::Transport(_) => true,
        FetchError::InvalidUrl { .. } | FetchError::TooLarge { .. } => false,
    }
}

#[async_trait]
impl DocumentFetcher for HttpDocumentFetcher {
    async fn fetch(&self, reference: &str) -> Result<Bytes, FetchError> {
        let url = Url::parse(reference)
            .ok()
            .filter(|u| matches!(u.scheme(), "http" | "https"))
            .ok_or_else(|| FetchError::InvalidUrl {
                reference: reference.to_string(),
            })?;

        let mut attempt = 0;
        loop {
            match self.fetch_once(&url).await {
                Ok(body) => {
                    debug!(bytes = body.len(), attempt = attempt + 1, "Document fetched");
                    return Ok(body);
                }
                Err(e) if attempt < self.config.max_retries && is_retryable(&e) => {
                    let backoff = self.backoff(attempt);
                    attempt += 1;
                    warn!(
                        error = %e,
                        attempt,
                        max_retries = self.config.max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        "Document fetch failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

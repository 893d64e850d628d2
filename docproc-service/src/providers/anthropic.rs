//! Anthropic Messages API client.

use async_trait::async_trait;
use base64::Engine;
use mime::Mime;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ExtractionProvider, ProviderKind, truncate_body};
use crate::config::AnthropicConfig;
use crate::error::ProviderError;

const PROVIDER: &str = "anthropic";
const API_VERSION: &str = "2023-06-01";
const PDF_BETA: &str = "pdfs-2024-09-25";

/// Anthropic API client
pub struct AnthropicProvider {
    client: Client,
    config: AnthropicConfig,
}

impl AnthropicProvider {
    pub fn new(client: Client, config: AnthropicConfig) -> Self {
        Self { client, config }
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/messages", self.config.base_url.trim_end_matches('/'))
    }
}

/// Build the content block carrying the document
fn document_block(
    file_name: &str,
    mime_type: &Mime,
    data: String,
) -> Result<ContentBlock, ProviderError> {
    let media_type = mime_type.essence_str().to_string();
    let source = Source {
        kind: "base64",
        media_type,
        data,
    };

    match mime_type.essence_str() {
        "application/pdf" => Ok(ContentBlock::Document { source }),
        "image/jpeg" | "image/png" | "image/gif" | "image/webp" => {
            Ok(ContentBlock::Image { source })
        }
        _ => Err(ProviderError::UnsupportedFormat {
            file_name: file_name.to_string(),
        }),
    }
}

#[async_trait]
impl ExtractionProvider for AnthropicProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn expects_json(&self) -> bool {
        self.config.expect_json
    }

    async fn extract(
        &self,
        file_name: &str,
        mime_type: &Mime,
        content: &[u8],
        prompt: &str,
    ) -> Result<String, ProviderError> {
        if self.config.api_key.is_empty() {
            return Err(ProviderError::NotConfigured {
                provider: PROVIDER,
                message: "api_key is not set".to_string(),
            });
        }

        let data = base64::engine::general_purpose::STANDARD.encode(content);
        let request = MessagesRequest {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            messages: vec![Message {
                role: "user",
                content: vec![
                    document_block(file_name, mime_type, data)?,
                    ContentBlock::Text {
                        text: prompt.to_string(),
                    },
                ],
            }],
        };

        debug!(
            file_name,
            model = %self.config.model,
            bytes = content.len(),
            "Sending document to Anthropic"
        );

        let response = self
            .client
            .post(self.endpoint())
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", API_VERSION)
            .header("anthropic-beta", PDF_BETA)
            .timeout(self.config.request_timeout())
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(PROVIDER, e))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(
                PROVIDER,
                status.as_u16(),
                truncate_body(&message),
            ));
        }

        let body: MessagesResponse =
            response
                .json()
                .await
                .map_err(|e| ProviderError::BadResponse {
                    provider: PROVIDER,
                    message: format!("invalid JSON: {}", e),
                })?;

        let text: String = body
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect();

        if text.is_empty() {
            return Err(ProviderError::BadResponse {
                provider: PROVIDER,
                message: format!(
                    "response has no text (stop reason: {})",
                    body.stop_reason.as_deref().unwrap_or("unknown")
                ),
            });
        }

        Ok(text)
    }
}

// Internal Anthropic API types

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Document { source: Source },
    Image { source: Source },
    Text { text: String },
}

#[derive(Debug, Serialize)]
struct Source {
    #[serde(rename = "type")]
    kind: &'static str,
    media_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ResponseBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

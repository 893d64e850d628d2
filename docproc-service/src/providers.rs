//! Extraction providers and provider selection.
//!
//! Exactly two providers exist. [`ProviderKind`] names them, [`select`] decides
//! which one is tried first, and [`ProviderSet`] maps a kind to its client.

mod anthropic;
mod gemini;

use std::sync::Arc;

use async_trait::async_trait;
use mime::Mime;
use strum::{Display, IntoStaticStr};

use crate::error::{ProviderError, ValidationError};
use crate::job::ProviderHint;

pub use anthropic::AnthropicProvider;
pub use gemini::GeminiProvider;

/// The two extraction backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ProviderKind {
    Gemini,
    Anthropic,
}

impl ProviderKind {
    pub fn name(self) -> &'static str {
        self.into()
    }
}

/// Ordered provider pair for a hint: `[primary, fallback]`
pub fn select(hint: Option<ProviderHint>) -> [ProviderKind; 2] {
    match hint {
        Some(ProviderHint::Alternate) => [ProviderKind::Anthropic, ProviderKind::Gemini],
        Some(ProviderHint::Default) | None => [ProviderKind::Gemini, ProviderKind::Anthropic],
    }
}

/// A document extraction backend
#[async_trait]
pub trait ExtractionProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Whether accepted output must parse as JSON
    fn expects_json(&self) -> bool {
        false
    }

    /// Run `prompt` against the document and return the raw text answer
    async fn extract(
        &self,
        file_name: &str,
        mime_type: &Mime,
        content: &[u8],
        prompt: &str,
    ) -> Result<String, ProviderError>;
}

/// Both providers, addressable by kind
#[derive(Clone)]
pub struct ProviderSet {
    gemini: Arc<dyn ExtractionProvider>,
    anthropic: Arc<dyn ExtractionProvider>,
}

impl ProviderSet {
    pub fn new(gemini: Arc<dyn ExtractionProvider>, anthropic: Arc<dyn ExtractionProvider>) -> Self {
        Self { gemini, anthropic }
    }

    pub fn get(&self, kind: ProviderKind) -> &Arc<dyn ExtractionProvider> {
        match kind {
            ProviderKind::Gemini => &self.gemini,
            ProviderKind::Anthropic => &self.anthropic,
        }
    }
}

/// Resolve the MIME type sent to providers.
///
/// The file name's extension wins; `file_type` may be an extension (`pdf`) or
/// a full MIME type (`application/pdf`).
pub fn resolve_mime(file_name: &str, file_type: &str) -> Option<Mime> {
    let from_extension = |ext: &str| -> Option<Mime> {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(mime::APPLICATION_PDF),
            "jpeg" | "jpg" => Some(mime::IMAGE_JPEG),
            "png" => Some(mime::IMAGE_PNG),
            "tiff" | "tif" => "image/tiff".parse().ok(),
            _ => None,
        }
    };

    let name_ext = file_name.rsplit_once('.').map(|(_, ext)| ext);
    if let Some(found) = name_ext.and_then(from_extension) {
        return Some(found);
    }

    let file_type = file_type.trim();
    match file_type.parse::<Mime>() {
        Ok(parsed) => from_extension(parsed.subtype().as_str()),
        Err(_) => from_extension(file_type.trim_start_matches('.')),
    }
}

/// Strip Markdown code fences and validate provider output
pub fn validate_output(
    provider: ProviderKind,
    raw: &str,
    expect_json: bool,
) -> Result<String, ValidationError> {
    let cleaned = raw.replace("```json", "").replace("```", "");
    let cleaned = cleaned.trim();

    if cleaned.is_empty() {
        return Err(ValidationError::Empty {
            provider: provider.name(),
        });
    }

    if expect_json {
        serde_json::from_str::<serde_json::Value>(cleaned).map_err(|source| {
            ValidationError::NotJson {
                provider: provider.name(),
                source,
            }
        })?;
    }

    Ok(cleaned.to_string())
}

/// Shorten a provider error body for logs and error messages
pub(crate) fn truncate_body(body: &str) -> String {
    const LIMIT: usize = 512;
    match body.char_indices().nth(LIMIT) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

//! Configuration struct definitions.

use serde::Deserialize;
use std::time::Duration;

use super::defaults::{
    default_admission, default_anthropic, default_auth, default_callback, default_dispatcher,
    default_fetch, default_gemini, default_providers, default_server,
};

/// Top-level service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_server")]
    pub server: ServerConfig,

    #[serde(default = "default_auth")]
    pub auth: AuthConfig,

    #[serde(default = "default_admission")]
    pub admission: AdmissionConfig,

    #[serde(default = "default_dispatcher")]
    pub dispatcher: DispatcherConfig,

    #[serde(default = "default_fetch")]
    pub fetch: FetchConfig,

    #[serde(default = "default_providers")]
    pub providers: ProvidersConfig,

    #[serde(default = "default_callback")]
    pub callback: CallbackConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            server: default_server(),
            auth: default_auth(),
            admission: default_admission(),
            dispatcher: default_dispatcher(),
            fetch: default_fetch(),
            providers: default_providers(),
            callback: default_callback(),
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "super::defaults::default_host")]
    pub host: String,

    #[serde(default = "super::defaults::default_port")]
    pub port: u16,

    /// Upper bound for answering an admission request
    #[serde(default = "super::defaults::default_server_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "super::defaults::default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Admission auth gate
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// When false every request is admitted
    #[serde(default = "super::defaults::default_auth_enabled")]
    pub enabled: bool,

    /// Bearer tokens accepted by the gate
    #[serde(default)]
    pub tokens: Vec<String>,
}

/// Admission request validation
#[derive(Debug, Clone, Deserialize)]
pub struct AdmissionConfig {
    #[serde(default = "super::defaults::default_require_prompt")]
    pub require_prompt: bool,

    /// Prompt used when the request carries none and `require_prompt` is off
    #[serde(default)]
    pub default_prompt: Option<String>,
}

/// Worker pool sizing
#[derive(Debug, Clone, Deserialize)]
pub struct DispatcherConfig {
    #[serde(default = "super::defaults::default_workers")]
    pub workers: usize,

    #[serde(default = "super::defaults::default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "super::defaults::default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
}

impl DispatcherConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

/// Document fetcher configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "super::defaults::default_fetch_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Retries after the first attempt on 5xx and transport failures
    #[serde(default = "super::defaults::default_fetch_max_retries")]
    pub max_retries: u32,

    #[serde(default = "super::defaults::default_fetch_backoff_ms")]
    pub backoff_ms: u64,

    #[serde(default = "super::defaults::default_max_document_size")]
    pub max_document_size_bytes: u64,
}

impl FetchConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Extraction providers
#[derive(Debug, Clone, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default = "default_gemini")]
    pub gemini: GeminiConfig,

    #[serde(default = "default_anthropic")]
    pub anthropic: AnthropicConfig,
}

/// Gemini `generateContent` provider
#[derive(Debug, Clone, Deserialize)]
pub struct GeminiConfig {
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "super::defaults::default_gemini_model")]
    pub model: String,

    #[serde(default = "super::defaults::default_gemini_url")]
    pub base_url: String,

    #[serde(default = "super::defaults::default_provider_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Reject output that does not parse as JSON
    #[serde(default)]
    pub expect_json: bool,
}

impl GeminiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Anthropic Messages API provider
#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicConfig {
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "super::defaults::default_anthropic_model")]
    pub model: String,

    #[serde(default = "super::defaults::default_anthropic_url")]
    pub base_url: String,

    #[serde(default = "super::defaults::default_anthropic_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "super::defaults::default_provider_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "super::defaults::default_anthropic_expect_json")]
    pub expect_json: bool,
}

impl AnthropicConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Webhook delivery configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CallbackConfig {
    /// Total delivery attempts per result
    #[serde(default = "super::defaults::default_callback_max_retries")]
    pub max_retries: u32,

    #[serde(default = "super::defaults::default_callback_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "super::defaults::default_callback_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Token audience. Defaults to the origin of each callback URL.
    #[serde(default)]
    pub audience: Option<String>,

    #[serde(default)]
    pub token_source: TokenSourceConfig,
}

impl CallbackConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Where callback bearer tokens come from
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TokenSourceConfig {
    /// Google metadata server identity tokens
    Metadata {
        #[serde(default = "super::defaults::default_metadata_identity_url")]
        endpoint: String,
    },
    /// A fixed token, for local development
    Static { token: String },
}

impl Default for TokenSourceConfig {
    fn default() -> Self {
        TokenSourceConfig::Metadata {
            endpoint: super::defaults::default_metadata_identity_url(),
        }
    }
}

//! Default value functions for ServiceConfig.

use super::schemas::{
    AdmissionConfig, AnthropicConfig, AuthConfig, CallbackConfig, DispatcherConfig, FetchConfig,
    GeminiConfig, ProvidersConfig, ServerConfig, TokenSourceConfig,
};

// ==================== Section Defaults ====================

pub(crate) fn default_server() -> ServerConfig {
    ServerConfig {
        host: default_host(),
        port: default_port(),
        request_timeout_secs: default_server_request_timeout_secs(),
        max_body_bytes: default_max_body_bytes(),
    }
}

pub(crate) fn default_auth() -> AuthConfig {
    AuthConfig {
        enabled: default_auth_enabled(),
        tokens: Vec::new(),
    }
}

pub(crate) fn default_admission() -> AdmissionConfig {
    AdmissionConfig {
        require_prompt: default_require_prompt(),
        default_prompt: None,
    }
}

pub(crate) fn default_dispatcher() -> DispatcherConfig {
    DispatcherConfig {
        workers: default_workers(),
        queue_capacity: default_queue_capacity(),
        drain_timeout_secs: default_drain_timeout_secs(),
    }
}

pub(crate) fn default_fetch() -> FetchConfig {
    FetchConfig {
        request_timeout_secs: default_fetch_timeout_secs(),
        max_retries: default_fetch_max_retries(),
        backoff_ms: default_fetch_backoff_ms(),
        max_document_size_bytes: default_max_document_size(),
    }
}

pub(crate) fn default_providers() -> ProvidersConfig {
    ProvidersConfig {
        gemini: default_gemini(),
        anthropic: default_anthropic(),
    }
}

pub(crate) fn default_gemini() -> GeminiConfig {
    GeminiConfig {
        api_key: String::new(),
        model: default_gemini_model(),
        base_url: default_gemini_url(),
        request_timeout_secs: default_provider_timeout_secs(),
        expect_json: false,
    }
}

pub(crate) fn default_anthropic() -> AnthropicConfig {
    AnthropicConfig {
        api_key: String::new(),
        model: default_anthropic_model(),
        base_url: default_anthropic_url(),
        max_tokens: default_anthropic_max_tokens(),
        request_timeout_secs: default_provider_timeout_secs(),
        expect_json: default_anthropic_expect_json(),
    }
}

pub(crate) fn default_callback() -> CallbackConfig {
    CallbackConfig {
        max_retries: default_callback_max_retries(),
        initial_backoff_ms: default_callback_initial_backoff_ms(),
        request_timeout_secs: default_callback_timeout_secs(),
        audience: None,
        token_source: TokenSourceConfig::default(),
    }
}

// ==================== Server ====================

pub(crate) fn default_host() -> String {
    "0.0.0.0".to_string()
}

pub(crate) fn default_port() -> u16 {
    8080
}

pub(crate) fn default_server_request_timeout_secs() -> u64 {
    10
}

pub(crate) fn default_max_body_bytes() -> usize {
    1024 * 1024 // 1 MiB
}

// ==================== Admission ====================

pub(crate) fn default_auth_enabled() -> bool {
    true
}

pub(crate) fn default_require_prompt() -> bool {
    true
}

// ==================== Dispatcher ====================

pub(crate) fn default_workers() -> usize {
    4
}

pub(crate) fn default_queue_capacity() -> usize {
    64
}

pub(crate) fn default_drain_timeout_secs() -> u64 {
    30
}

// ==================== Fetch ====================

pub(crate) fn default_fetch_timeout_secs() -> u64 {
    60
}

pub(crate) fn default_fetch_max_retries() -> u32 {
    3
}

pub(crate) fn default_fetch_backoff_ms() -> u64 {
    500
}

pub(crate) fn default_max_document_size() -> u64 {
    50 * 1024 * 1024 // 50 MiB
}

// ==================== Providers ====================

pub(crate) fn default_provider_timeout_secs() -> u64 {
    120
}

pub(crate) fn default_gemini_model() -> String {
    "gemini-2.0-flash".to_string()
}

pub(crate) fn default_gemini_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

pub(crate) fn default_anthropic_model() -> String {
    "claude-3-5-sonnet-20241022".to_string()
}

pub(crate) fn default_anthropic_url() -> String {
    "https://api.anthropic.com".to_string()
}

pub(crate) fn default_anthropic_max_tokens() -> u32 {
    8192
}

pub(crate) fn default_anthropic_expect_json() -> bool {
    true
}

// ==================== Callback ====================

pub(crate) fn default_callback_max_retries() -> u32 {
    3
}

pub(crate) fn default_callback_initial_backoff_ms() -> u64 {
    1000
}

pub(crate) fn default_callback_timeout_secs() -> u64 {
    30
}

pub(crate) fn default_metadata_identity_url() -> String {
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/identity"
        .to_string()
}

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use strum::IntoStaticStr;
use thiserror::Error;

/// Errors surfaced synchronously by the HTTP API
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Processing queue is full")]
    QueueFull,

    #[error("Service is shutting down")]
    ShuttingDown,

    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Document fetch errors. Terminal for the job.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Invalid document reference: {reference}")]
    InvalidUrl { reference: String },

    #[error("Document fetch failed with status {status}")]
    Status { status: u16 },

    #[error("Document fetch failed")]
    Transport(#[source] reqwest::Error),

    #[error("Document too large: at least {size} bytes (max {max} bytes)")]
    TooLarge { size: u64, max: u64 },
}

/// Coarse classification of provider failures, used for logging and metric labels
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ProviderErrorKind {
    Timeout,
    RateLimited,
    BadResponse,
    Transport,
}

/// Extraction provider errors
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("{provider} request timed out")]
    Timeout { provider: &'static str },

    #[error("{provider} rate limited the request (status {status})")]
    RateLimited { provider: &'static str, status: u16 },

    #[error("{provider} returned status {status}: {message}")]
    Api {
        provider: &'static str,
        status: u16,
        message: String,
    },

    #[error("{provider} returned an unusable response: {message}")]
    BadResponse {
        provider: &'static str,
        message: String,
    },

    #[error("Connection to {provider} failed")]
    Transport {
        provider: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("Unsupported file format for file: {file_name}")]
    UnsupportedFormat { file_name: String },

    #[error("{provider} is not configured: {message}")]
    NotConfigured {
        provider: &'static str,
        message: String,
    },
}

impl ProviderError {
    pub fn kind(&self) -> ProviderErrorKind {
        match self {
            ProviderError::Timeout { .. } => ProviderErrorKind::Timeout,
            ProviderError::RateLimited { .. } => ProviderErrorKind::RateLimited,
            ProviderError::Transport { .. } => ProviderErrorKind::Transport,
            ProviderError::Api { .. }
            | ProviderError::BadResponse { .. }
            | ProviderError::UnsupportedFormat { .. }
            | ProviderError::NotConfigured { .. } => ProviderErrorKind::BadResponse,
        }
    }

    /// Map a reqwest send/receive failure to the matching provider error
    pub fn from_reqwest(provider: &'static str, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            ProviderError::Timeout { provider }
        } else {
            ProviderError::Transport { provider, source }
        }
    }

    /// Map a non-success HTTP status to the matching provider error
    pub fn from_status(provider: &'static str, status: u16, message: String) -> Self {
        match status {
            429 => ProviderError::RateLimited { provider, status },
            408 | 504 => ProviderError::Timeout { provider },
            _ => ProviderError::Api {
                provider,
                status,
                message,
            },
        }
    }
}

/// Provider output that failed validation
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("{provider} returned empty output")]
    Empty { provider: &'static str },

    #[error("{provider} returned output that is not valid JSON")]
    NotJson {
        provider: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Either kind of extraction failure. Both trigger the fallback provider.
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl ExtractionError {
    pub fn kind(&self) -> &'static str {
        match self {
            ExtractionError::Provider(e) => e.kind().into(),
            ExtractionError::Validation(_) => "validation",
        }
    }
}

/// Token issuance errors
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Token request to {endpoint} failed")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Token endpoint returned status {status}")]
    Status { status: u16 },

    #[error("Token endpoint returned an empty token")]
    EmptyToken,
}

/// A single failed callback attempt
#[derive(Error, Debug)]
pub enum CallbackAttemptError {
    #[error("Could not obtain callback token")]
    Token(#[from] AuthError),

    #[error("Callback request failed")]
    Transport(#[source] reqwest::Error),

    #[error("Callback returned status {status}")]
    Status { status: u16 },
}

/// Callback delivery errors
#[derive(Error, Debug)]
pub enum CallbackDeliveryError {
    #[error("Invalid callback URL: {url}")]
    InvalidUrl { url: String },

    #[error("Callback delivery failed after {attempts} attempts: {last_error}")]
    Exhausted {
        attempts: u32,
        last_error: CallbackAttemptError,
    },
}

/// Job queue errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Job queue is full")]
    QueueFull,

    #[error("Job queue is closed")]
    Closed,
}

impl From<DispatchError> for ServiceError {
    fn from(error: DispatchError) -> Self {
        match error {
            DispatchError::QueueFull => ServiceError::QueueFull,
            DispatchError::Closed => ServiceError::ShuttingDown,
        }
    }
}

/// API error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            ServiceError::Unauthorized => StatusCode::UNAUTHORIZED,
            ServiceError::QueueFull | ServiceError::ShuttingDown => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ServiceError::Config { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            ServiceError::InvalidRequest { .. } => "invalid_request",
            ServiceError::Unauthorized => "unauthorized",
            ServiceError::QueueFull => "queue_full",
            ServiceError::ShuttingDown => "shutting_down",
            ServiceError::Config { .. } => "config_error",
        }
    }

    fn retry_after_secs(&self) -> Option<u64> {
        match self {
            ServiceError::QueueFull => Some(5),
            _ => None,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let response = ErrorResponse {
            message: self.to_string(),
            code: Some(self.error_code().to_string()),
            retry_after_secs: self.retry_after_secs(),
        };

        (status, Json(response)).into_response()
    }
}

/// Result type alias for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Render an error and its sources as a single line
pub fn format_error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

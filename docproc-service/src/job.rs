//! Processing job and result types.
//!
//! A [`ProcessingJob`] is built once from a validated admission request and is
//! never mutated afterwards. A [`ProcessingResult`] is the single value the
//! pipeline hands to callback delivery for that job.

use std::collections::BTreeMap;
use std::str::FromStr;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::config::AdmissionConfig;
use crate::error::ServiceError;

/// Caller preference for which provider is tried first
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ProviderHint {
    Default,
    Alternate,
}

impl ProviderHint {
    /// Unknown hint values fall back to the default order
    pub fn parse_lenient(value: Option<&str>) -> Option<Self> {
        value.and_then(|v| ProviderHint::from_str(v.trim()).ok())
    }
}

/// An admitted document processing job
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingJob {
    pub id: String,
    pub name: String,
    pub document_type: String,
    pub file_type: String,
    pub source_ref: String,
    pub prompt: String,
    pub tenant_id: String,
    pub collection_id: String,
    pub callback_url: String,
    pub provider_hint: Option<ProviderHint>,
}

/// Admission request body
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProcessDocumentRequest {
    pub id: Option<String>,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub document_type: Option<String>,
    pub url: Option<String>,
    pub file_type: Option<String>,
    pub tenant_id: Option<String>,
    pub collection_id: Option<String>,
    pub callback_url: Option<String>,
    pub prompt: Option<String>,
    pub provider: Option<String>,
}

fn required(field: &'static str, value: Option<String>) -> Result<String, ServiceError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ServiceError::InvalidRequest {
            message: format!("missing required field: {}", field),
        }),
    }
}

fn http_url(field: &'static str, value: String) -> Result<String, ServiceError> {
    match Url::parse(&value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(value),
        _ => Err(ServiceError::InvalidRequest {
            message: format!("{} must be an http(s) URL", field),
        }),
    }
}

impl ProcessDocumentRequest {
    /// Validate the request and build the job it describes
    pub fn into_job(self, admission: &AdmissionConfig) -> Result<ProcessingJob, ServiceError> {
        let id = required("id", self.id)?;
        let name = required("name", self.name)?;
        let document_type = required("type", self.document_type)?;
        let source_ref = http_url("url", required("url", self.url)?)?;
        let file_type = required("file_type", self.file_type)?;
        let tenant_id = required("tenant_id", self.tenant_id)?;
        let collection_id = required("collection_id", self.collection_id)?;
        let callback_url = http_url("callback_url", required("callback_url", self.callback_url)?)?;

        let prompt = match self.prompt.filter(|p| !p.trim().is_empty()) {
            Some(prompt) => prompt,
            None if admission.require_prompt => {
                return Err(ServiceError::InvalidRequest {
                    message: "missing required field: prompt".to_string(),
                });
            }
            None => admission
                .default_prompt
                .clone()
                .filter(|p| !p.trim().is_empty())
                .ok_or_else(|| ServiceError::InvalidRequest {
                    message: "missing required field: prompt".to_string(),
                })?,
        };

        Ok(ProcessingJob {
            id,
            name,
            document_type,
            file_type,
            source_ref,
            prompt,
            tenant_id,
            collection_id,
            callback_url,
            provider_hint: ProviderHint::parse_lenient(self.provider.as_deref()),
        })
    }
}

/// Terminal value delivered to the caller's webhook.
///
/// Exactly one of `parsed_data` and `error` is set; the constructors are the
/// only way to build one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessingResult {
    id: String,
    name: String,
    #[serde(rename = "type")]
    document_type: String,
    parsed_data: Option<String>,
    metadata: BTreeMap<String, String>,
    error: Option<String>,
}

impl ProcessingResult {
    pub fn success(job: &ProcessingJob, parsed_data: String) -> Self {
        Self {
            id: job.id.clone(),
            name: job.name.clone(),
            document_type: job.document_type.clone(),
            parsed_data: Some(parsed_data),
            metadata: BTreeMap::new(),
            error: None,
        }
    }

    pub fn failure(job: &ProcessingJob, error: impl Into<String>) -> Self {
        let mut error = error.into();
        if error.trim().is_empty() {
            error = "document processing failed".to_string();
        }

        Self {
            id: job.id.clone(),
            name: job.name.clone(),
            document_type: job.document_type.clone(),
            parsed_data: None,
            metadata: BTreeMap::new(),
            error: Some(error),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn parsed_data(&self) -> Option<&str> {
        self.parsed_data.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_success(&self) -> bool {
        self.parsed_data.is_some()
    }
}

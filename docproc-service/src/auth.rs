//! Admission auth gate.
//!
//! Identity verification is out of scope for this service: the gate only
//! answers whether a bearer token is acceptable.

use std::collections::HashSet;

use crate::config::AuthConfig;

/// Decides whether an admission request may proceed
pub trait AuthGate: Send + Sync {
    fn authorize(&self, bearer: Option<&str>) -> bool;
}

/// Admits every request
pub struct OpenGate;

impl AuthGate for OpenGate {
    fn authorize(&self, _bearer: Option<&str>) -> bool {
        true
    }
}

/// Admits requests carrying one of a fixed set of tokens
pub struct StaticTokenGate {
    tokens: HashSet<String>,
}

impl StaticTokenGate {
    pub fn new(tokens: impl IntoIterator<Item = String>) -> Self {
        Self {
            tokens: tokens
                .into_iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }
}

impl AuthGate for StaticTokenGate {
    fn authorize(&self, bearer: Option<&str>) -> bool {
        bearer.is_some_and(|token| self.tokens.contains(token))
    }
}

/// Build the gate selected in configuration
pub fn gate_from_config(config: &AuthConfig) -> Box<dyn AuthGate> {
    if config.enabled {
        Box::new(StaticTokenGate::new(config.tokens.iter().cloned()))
    } else {
        Box::new(OpenGate)
    }
}

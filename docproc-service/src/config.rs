//! Service configuration.
//!
//! Values come from (lowest to highest precedence) `config/application.*`,
//! `config/application-{APP_ENV}.*`, `DOCPROC__*` environment variables and
//! `PORT`.

mod defaults;
mod loader;
mod schemas;

pub use loader::load_config;
pub use schemas::{
    AdmissionConfig, AnthropicConfig, AuthConfig, CallbackConfig, DispatcherConfig, FetchConfig,
    GeminiConfig, ProvidersConfig, ServerConfig, ServiceConfig, TokenSourceConfig,
};

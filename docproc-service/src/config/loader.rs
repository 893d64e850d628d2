//! Configuration loading from files and environment variables.

use ::config::builder::DefaultState;
use ::config::{Config, ConfigBuilder, Environment, File};

use crate::error::{ServiceError, ServiceResult};

use super::schemas::ServiceConfig;

/// Load configuration from `config/application*` files, `DOCPROC__*` env vars and `PORT`
pub fn load_config() -> ServiceResult<ServiceConfig> {
    let env = std::env::var("APP_ENV").ok();

    let port = match std::env::var("PORT") {
        Ok(value) => Some(value.parse::<u16>().map_err(|e| ServiceError::Config {
            message: format!("Invalid PORT {value:?}: {e}"),
        })?),
        Err(_) => None,
    };

    let mut builder =
        Config::builder().add_source(File::with_name("config/application").required(false));
    if let Some(overlay) = overlay_file(env.as_deref()) {
        builder = builder.add_source(File::with_name(&overlay).required(false));
    }

    let builder = builder
        .add_source(
            Environment::with_prefix("DOCPROC")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("auth.tokens")
                .try_parsing(true),
        )
        .set_override_option("server.port", port.map(i64::from))
        .map_err(|e| ServiceError::Config {
            message: format!("Failed to apply PORT override: {}", e),
        })?;

    let config = finish(builder)?;

    tracing::info!(env = env.as_deref().unwrap_or("base"), "Configuration loaded");

    Ok(config)
}

/// Environment overlay for `APP_ENV`. Without `APP_ENV` only the base file is read.
fn overlay_file(env: Option<&str>) -> Option<String> {
    env.map(str::trim)
        .filter(|env| !env.is_empty())
        .map(|env| format!("config/application-{}", env.to_lowercase()))
}

fn finish(builder: ConfigBuilder<DefaultState>) -> ServiceResult<ServiceConfig> {
    let config: ServiceConfig = builder
        .build()
        .map_err(|e| ServiceError::Config {
            message: format!("Failed to build config: {}", e),
        })?
        .try_deserialize()
        .map_err(|e| ServiceError::Config {
            message: format!("Failed to deserialize config: {}", e),
        })?;

    validate(&config)?;
    Ok(config)
}

/// Reject settings the pipeline cannot run with
fn validate(config: &ServiceConfig) -> ServiceResult<()> {
    let invalid = |message: &str| {
        Err(ServiceError::Config {
            message: message.to_string(),
        })
    };

    if config.dispatcher.workers == 0 {
        return invalid("dispatcher.workers must be at least 1");
    }
    if config.dispatcher.queue_capacity == 0 {
        return invalid("dispatcher.queue_capacity must be at least 1");
    }
    if config.callback.max_retries == 0 {
        return invalid("callback.max_retries must be at least 1");
    }
    if !config.admission.require_prompt
        && config
            .admission
            .default_prompt
            .as_deref()
            .is_none_or(|p| p.trim().is_empty())
    {
        tracing::warn!("admission.require_prompt is off and no default_prompt is set");
    }
    if config.auth.enabled && config.auth.tokens.is_empty() {
        tracing::warn!("auth.enabled is set but auth.tokens is empty; every request will be rejected");
    }

    Ok(())
}

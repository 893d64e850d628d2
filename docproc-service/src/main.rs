use std::sync::Arc;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod api;
mod auth;
mod callback;
mod config;
mod dispatcher;
mod error;
mod fetcher;
mod job;
mod pipeline;
mod providers;
mod token;

use crate::api::AppState;
use crate::callback::{CallbackClient, RetryPolicy};
use crate::dispatcher::Dispatcher;
use crate::fetcher::HttpDocumentFetcher;
use crate::pipeline::ProcessingPipeline;
use crate::providers::{AnthropicProvider, GeminiProvider, ProviderSet};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    info!(
        "Starting document processing service v{}",
        env!("CARGO_PKG_VERSION")
    );

    let config = config::load_config()?;
    info!(
        host = %config.server.host,
        port = config.server.port,
        workers = config.dispatcher.workers,
        queue_capacity = config.dispatcher.queue_capacity,
        auth_enabled = config.auth.enabled,
        "Configuration loaded"
    );

    let metrics = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "Prometheus recorder not installed, /metrics will be empty");
            None
        }
    };

    // One connection pool for fetches, providers, tokens and callbacks
    let http = reqwest::Client::builder()
        .user_agent(concat!("docproc-service/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let providers = ProviderSet::new(
        Arc::new(GeminiProvider::new(
            http.clone(),
            config.providers.gemini.clone(),
        )),
        Arc::new(AnthropicProvider::new(
            http.clone(),
            config.providers.anthropic.clone(),
        )),
    );

    let callback = CallbackClient::new(
        http.clone(),
        token::issuer_from_config(http.clone(), &config.callback.token_source),
        config.callback.audience.clone(),
        RetryPolicy::from_config(&config.callback),
    );

    let pipeline = Arc::new(ProcessingPipeline::new(
        Arc::new(HttpDocumentFetcher::new(http.clone(), config.fetch.clone())),
        providers,
        callback,
    ));

    let dispatcher = Arc::new(Dispatcher::start(pipeline, &config.dispatcher));

    let state = Arc::new(AppState {
        dispatcher: dispatcher.clone(),
        auth: auth::gate_from_config(&config.auth),
        admission: config.admission.clone(),
        metrics,
        start_time: Instant::now(),
    });
    let app = api::router(state, &config.server);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await?;

    info!(
        drain_timeout_secs = config.dispatcher.drain_timeout_secs,
        "HTTP server stopped, draining jobs"
    );
    if !dispatcher
        .shutdown(config.dispatcher.drain_timeout())
        .await
    {
        warn!("Some jobs did not finish before shutdown");
    }

    Ok(())
}

async fn wait_for_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
    shutdown.cancel();
}

fn init_logging() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    // Use RUST_LOG if set, otherwise default to info level for our crate
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("docproc_service=info,tower_http=info"));

    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_current_span(true))
            .with(filter)
            .init();
    } else {
        let format = fmt::format()
            .with_target(true)
            .with_thread_ids(true)
            .compact();

        tracing_subscriber::registry()
            .with(fmt::layer().event_format(format))
            .with(filter)
            .init();
    }
}

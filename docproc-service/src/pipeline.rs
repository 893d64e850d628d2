//! Per-job processing: fetch → extract (primary, then at most one fallback) →
//! build result → deliver callback.
//!
//! Every failure after admission ends up as a [`ProcessingResult`] with
//! `error` set and is still delivered to the caller.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use metrics::{counter, histogram};
use std::fmt;
use tracing::{error, info, warn};

use crate::callback::CallbackClient;
use crate::dispatcher::JobHandler;
use crate::error::{ExtractionError, ProviderError, format_error_chain};
use crate::fetcher::DocumentFetcher;
use crate::job::{ProcessingJob, ProcessingResult};
use crate::providers::{self, ProviderKind, ProviderSet};

/// Pipeline states, used for logging transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Fetching,
    Extracting(ProviderKind),
    Delivering,
    Done,
    Failed,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Fetching => f.write_str("fetching"),
            JobState::Extracting(kind) => write!(f, "extracting({})", kind),
            JobState::Delivering => f.write_str("delivering"),
            JobState::Done => f.write_str("done"),
            JobState::Failed => f.write_str("failed"),
        }
    }
}

/// Successful extraction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub provider: ProviderKind,
    pub text: String,
    pub provider_calls: u32,
}

/// What happened to a job
#[derive(Debug)]
pub struct JobOutcome {
    pub state: JobState,
    pub result: ProcessingResult,
    pub delivered: bool,
}

/// Runs jobs end to end
pub struct ProcessingPipeline {
    fetcher: Arc<dyn DocumentFetcher>,
    providers: ProviderSet,
    callback: CallbackClient,
}

impl ProcessingPipeline {
    pub fn new(
        fetcher: Arc<dyn DocumentFetcher>,
        providers: ProviderSet,
        callback: CallbackClient,
    ) -> Self {
        Self {
            fetcher,
            providers,
            callback,
        }
    }

    /// Process one job to a terminal state
    pub async fn run(&self, job: ProcessingJob) -> JobOutcome {
        let started = Instant::now();
        info!(
            job_id = %job.id,
            state = %JobState::Fetching,
            tenant_id = %job.tenant_id,
            collection_id = %job.collection_id,
            "Processing document"
        );

        let (state, result) = match self.fetcher.fetch(&job.source_ref).await {
            Err(e) => {
                warn!(job_id = %job.id, error = %format_error_chain(&e), "Document fetch failed");
                (
                    JobState::Failed,
                    ProcessingResult::failure(&job, format!("Failed to fetch document: {}", e)),
                )
            }
            Ok(content) => match self.extract_with_fallback(&job, &content).await {
                Ok(extraction) => {
                    info!(
                        job_id = %job.id,
                        provider = %extraction.provider,
                        provider_calls = extraction.provider_calls,
                        "Extraction succeeded"
                    );
                    (
                        JobState::Done,
                        ProcessingResult::success(&job, extraction.text),
                    )
                }
                Err(message) => {
                    warn!(job_id = %job.id, error = %message, "Extraction failed on both providers");
                    (JobState::Failed, ProcessingResult::failure(&job, message))
                }
            },
        };

        info!(job_id = %job.id, state = %JobState::Delivering, "Delivering result");
        let delivered = match self.callback.deliver(&job.callback_url, &result).await {
            Ok(_) => true,
            Err(e) => {
                error!(
                    job_id = %job.id,
                    success = result.is_success(),
                    error = %format_error_chain(&e),
                    "Result could not be delivered, dropping job"
                );
                false
            }
        };

        let outcome = if state == JobState::Done { "done" } else { "failed" };
        counter!("docproc_jobs_completed_total", "outcome" => outcome).increment(1);
        histogram!("docproc_job_duration_seconds").record(started.elapsed().as_secs_f64());
        info!(
            job_id = %job.id,
            state = %state,
            delivered,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Job finished"
        );

        JobOutcome {
            state,
            result,
            delivered,
        }
    }

    /// Try the primary provider, then the fallback exactly once.
    ///
    /// Returns the combined error message when both fail.
    pub async fn extract_with_fallback(
        &self,
        job: &ProcessingJob,
        content: &[u8],
    ) -> Result<Extraction, String> {
        let [primary, fallback] = providers::select(job.provider_hint);

        let primary_err = match self.attempt(primary, job, content).await {
            Ok(text) => {
                return Ok(Extraction {
                    provider: primary,
                    text,
                    provider_calls: 1,
                });
            }
            Err(e) => e,
        };

        counter!("docproc_provider_fallbacks_total").increment(1);
        warn!(
            job_id = %job.id,
            provider = %primary,
            fallback = %fallback,
            kind = primary_err.kind(),
            error = %format_error_chain(&primary_err),
            "Primary provider failed, trying fallback"
        );

        match self.attempt(fallback, job, content).await {
            Ok(text) => Ok(Extraction {
                provider: fallback,
                text,
                provider_calls: 2,
            }),
            Err(fallback_err) => Err(format!(
                "Extraction failed. {}: {}; {}: {}",
                primary,
                format_error_chain(&primary_err),
                fallback,
                format_error_chain(&fallback_err)
            )),
        }
    }

    async fn attempt(
        &self,
        kind: ProviderKind,
        job: &ProcessingJob,
        content: &[u8],
    ) -> Result<String, ExtractionError> {
        let outcome = self.call_provider(kind, job, content).await;
        let label = match &outcome {
            Ok(_) => "success",
            Err(e) => e.kind(),
        };
        counter!("docproc_provider_calls_total", "provider" => kind.name(), "outcome" => label)
            .increment(1);

        outcome
    }

    async fn call_provider(
        &self,
        kind: ProviderKind,
        job: &ProcessingJob,
        content: &[u8],
    ) -> Result<String, ExtractionError> {
        let provider = self.providers.get(kind);
        info!(
            job_id = %job.id,
            state = %JobState::Extracting(provider.kind()),
            "Extracting"
        );

        let mime_type = providers::resolve_mime(&job.name, &job.file_type).ok_or_else(|| {
            ProviderError::UnsupportedFormat {
                file_name: job.name.clone(),
            }
        })?;

        let raw = provider
            .extract(&job.name, &mime_type, content, &job.prompt)
            .await?;

        Ok(providers::validate_output(kind, &raw, provider.expects_json())?)
    }
}

#[async_trait]
impl JobHandler for ProcessingPipeline {
    async fn handle(&self, job: ProcessingJob) {
        self.run(job).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::RetryPolicy;
    use crate::error::FetchError;
    use crate::job::ProviderHint;
    use crate::job::tests::sample_job;
    use crate::providers::ExtractionProvider;
    use crate::token::StaticTokenIssuer;
    use bytes::Bytes;
    use mime::Mime;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct StaticFetcher {
        body: Option<&'static [u8]>,
    }

    #[async_trait]
    impl DocumentFetcher for StaticFetcher {
        async fn fetch(&self, _reference: &str) -> Result<Bytes, FetchError> {
            match self.body {
                Some(body) => Ok(Bytes::from_static(body)),
                None => Err(FetchError::Status { status: 403 }),
            }
        }
    }

    /// Provider returning a scripted answer and counting calls
    struct ScriptedProvider {
        kind: ProviderKind,
        answer: Result<&'static str, &'static str>,
        expect_json: bool,
        calls: AtomicU32,
        seen: Mutex<Vec<(String, String, String)>>,
    }

    impl ScriptedProvider {
        fn ok(kind: ProviderKind, text: &'static str) -> Arc<Self> {
            Arc::new(Self {
                kind,
                answer: Ok(text),
                expect_json: false,
                calls: AtomicU32::new(0),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn failing(kind: ProviderKind, message: &'static str) -> Arc<Self> {
            Arc::new(Self {
                kind,
                answer: Err(message),
                expect_json: false,
                calls: AtomicU32::new(0),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn json_only(kind: ProviderKind, text: &'static str) -> Arc<Self> {
            Arc::new(Self {
                kind,
                answer: Ok(text),
                expect_json: true,
                calls: AtomicU32::new(0),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ExtractionProvider for ScriptedProvider {
        fn kind(&self) -> ProviderKind {
            self.kind
        }

        fn expects_json(&self) -> bool {
            self.expect_json
        }

        async fn extract(
            &self,
            file_name: &str,
            mime_type: &Mime,
            content: &[u8],
            prompt: &str,
        ) -> Result<String, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push((
                file_name.to_string(),
                mime_type.to_string(),
                format!("{}:{}", content.len(), prompt),
            ));
            match self.answer {
                Ok(text) => Ok(text.to_string()),
                Err(message) if message == "timeout" => Err(ProviderError::Timeout {
                    provider: self.kind.name(),
                }),
                Err(message) => Err(ProviderError::BadResponse {
                    provider: self.kind.name(),
                    message: message.to_string(),
                }),
            }
        }
    }

    fn callback_client() -> CallbackClient {
        CallbackClient::new(
            reqwest::Client::new(),
            Arc::new(StaticTokenIssuer::new("cb-token")),
            None,
            RetryPolicy {
                max_attempts: 3,
                initial_backoff: Duration::from_millis(10),
                request_timeout: Duration::from_secs(5),
            },
        )
    }

    fn pipeline(
        fetch_ok: bool,
        gemini: Arc<ScriptedProvider>,
        anthropic: Arc<ScriptedProvider>,
    ) -> ProcessingPipeline {
        ProcessingPipeline::new(
            Arc::new(StaticFetcher {
                body: fetch_ok.then_some(b"%PDF-1.7".as_slice()),
            }),
            ProviderSet::new(gemini, anthropic),
            callback_client(),
        )
    }

    async fn webhook(expected: serde_json::Value) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/callback"))
            .and(body_json(expected))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        server
    }

    fn job_for(id: &str, server: &MockServer) -> ProcessingJob {
        let mut job = sample_job(id);
        job.callback_url = format!("{}/callback", server.uri());
        job
    }

    #[tokio::test]
    async fn test_primary_success_never_calls_fallback() {
        let server = webhook(serde_json::json!({
            "id": "J1", "name": "invoice.pdf", "type": "INVOICE",
            "parsed_data": "{\"total\":42}", "metadata": {}, "error": null
        }))
        .await;

        let gemini = ScriptedProvider::ok(ProviderKind::Gemini, r#"{"total":42}"#);
        let anthropic = ScriptedProvider::ok(ProviderKind::Anthropic, "unused");
        let pipeline = pipeline(true, gemini.clone(), anthropic.clone());

        let outcome = pipeline.run(job_for("J1", &server)).await;

        assert_eq!(outcome.state, JobState::Done);
        assert!(outcome.delivered);
        assert_eq!(outcome.result.parsed_data(), Some(r#"{"total":42}"#));
        assert_eq!(gemini.calls(), 1);
        assert_eq!(anthropic.calls(), 0);
    }

    #[tokio::test]
    async fn test_primary_timeout_falls_back() {
        let server = webhook(serde_json::json!({
            "id": "J2", "name": "invoice.pdf", "type": "INVOICE",
            "parsed_data": "abc", "metadata": {}, "error": null
        }))
        .await;

        let gemini = ScriptedProvider::failing(ProviderKind::Gemini, "timeout");
        let anthropic = ScriptedProvider::ok(ProviderKind::Anthropic, "abc");
        let pipeline = pipeline(true, gemini.clone(), anthropic.clone());

        let outcome = pipeline.run(job_for("J2", &server)).await;

        assert_eq!(outcome.state, JobState::Done);
        assert_eq!(outcome.result.parsed_data(), Some("abc"));
        assert_eq!(outcome.result.error(), None);
        assert_eq!(gemini.calls() + anthropic.calls(), 2);

        // identical inputs on both attempts
        let primary_seen = gemini.seen.lock().unwrap().clone();
        let fallback_seen = anthropic.seen.lock().unwrap().clone();
        assert_eq!(primary_seen, fallback_seen);
        assert_eq!(primary_seen[0].1, "application/pdf");
    }

    #[tokio::test]
    async fn test_both_providers_failing_sends_error_result() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/callback"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let gemini = ScriptedProvider::failing(ProviderKind::Gemini, "garbage");
        let anthropic = ScriptedProvider::failing(ProviderKind::Anthropic, "overloaded");
        let pipeline = pipeline(true, gemini.clone(), anthropic.clone());

        let outcome = pipeline.run(job_for("J3", &server)).await;

        assert_eq!(outcome.state, JobState::Failed);
        assert!(outcome.delivered);
        assert_eq!(outcome.result.parsed_data(), None);
        let message = outcome.result.error().unwrap();
        assert!(message.contains("garbage"));
        assert!(message.contains("overloaded"));
        assert_eq!(gemini.calls(), 1);
        assert_eq!(anthropic.calls(), 1);

        let requests = server.received_requests().await.unwrap();
        let payload: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(payload["id"], "J3");
        assert_eq!(payload["parsed_data"], serde_json::Value::Null);
        assert!(payload["error"].as_str().is_some_and(|e| !e.is_empty()));
    }

    #[tokio::test]
    async fn test_alternate_hint_starts_with_anthropic() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let gemini = ScriptedProvider::ok(ProviderKind::Gemini, "from gemini");
        let anthropic = ScriptedProvider::ok(ProviderKind::Anthropic, "from anthropic");
        let pipeline = pipeline(true, gemini.clone(), anthropic.clone());

        let mut job = job_for("J9", &server);
        job.provider_hint = Some(ProviderHint::Alternate);
        let outcome = pipeline.run(job).await;

        assert_eq!(outcome.result.parsed_data(), Some("from anthropic"));
        assert_eq!(gemini.calls(), 0);
        assert_eq!(anthropic.calls(), 1);
    }

    #[tokio::test]
    async fn test_invalid_output_triggers_fallback() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let gemini = ScriptedProvider::json_only(ProviderKind::Gemini, "not json");
        let anthropic = ScriptedProvider::ok(ProviderKind::Anthropic, "```json\n{\"a\":1}\n```");
        let pipeline = pipeline(true, gemini.clone(), anthropic.clone());

        let outcome = pipeline.run(job_for("J10", &server)).await;

        assert_eq!(outcome.state, JobState::Done);
        assert_eq!(outcome.result.parsed_data(), Some("{\"a\":1}"));
        assert_eq!(gemini.calls(), 1);
        assert_eq!(anthropic.calls(), 1);
    }

    #[tokio::test]
    async fn test_fetch_failure_skips_extraction() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let gemini = ScriptedProvider::ok(ProviderKind::Gemini, "unused");
        let anthropic = ScriptedProvider::ok(ProviderKind::Anthropic, "unused");
        let pipeline = pipeline(false, gemini.clone(), anthropic.clone());

        let outcome = pipeline.run(job_for("J11", &server)).await;

        assert_eq!(outcome.state, JobState::Failed);
        assert!(outcome.result.error().unwrap().contains("403"));
        assert_eq!(gemini.calls() + anthropic.calls(), 0);
    }

    #[tokio::test]
    async fn test_unsupported_format_fails_both_attempts_without_calls() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let gemini = ScriptedProvider::ok(ProviderKind::Gemini, "unused");
        let anthropic = ScriptedProvider::ok(ProviderKind::Anthropic, "unused");
        let pipeline = pipeline(true, gemini.clone(), anthropic.clone());

        let mut job = job_for("J12", &server);
        job.name = "report.docx".to_string();
        job.file_type = "docx".to_string();
        let outcome = pipeline.run(job).await;

        assert_eq!(outcome.state, JobState::Failed);
        assert!(outcome.result.error().unwrap().contains("Unsupported file format"));
        assert_eq!(gemini.calls() + anthropic.calls(), 0);
    }

    #[tokio::test]
    async fn test_undeliverable_result_is_dropped() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let gemini = ScriptedProvider::ok(ProviderKind::Gemini, "abc");
        let anthropic = ScriptedProvider::ok(ProviderKind::Anthropic, "unused");
        let pipeline = pipeline(true, gemini, anthropic);

        let outcome = pipeline.run(job_for("J13", &server)).await;

        assert_eq!(outcome.state, JobState::Done);
        assert!(!outcome.delivered);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(JobState::Fetching.to_string(), "fetching");
        assert_eq!(
            JobState::Extracting(ProviderKind::Anthropic).to_string(),
            "extracting(anthropic)"
        );
    }
}

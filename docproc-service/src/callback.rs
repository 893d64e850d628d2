//! Webhook delivery of processing results.
//!
//! Each attempt gets a freshly issued bearer token. Attempts are separated by
//! exponential backoff (`initial_backoff * 2^n`); there is no wait after the
//! last attempt.

use metrics::counter;
use reqwest::{Client, StatusCode, Url, header};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::CallbackConfig;
use crate::error::{CallbackAttemptError, CallbackDeliveryError};
use crate::job::ProcessingResult;
use crate::token::TokenIssuer;

/// Attempt budget and backoff schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub request_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &CallbackConfig) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            initial_backoff: config.initial_backoff(),
            request_timeout: config.request_timeout(),
        }
    }

    /// Wait before attempt `failed_attempts + 1`, given `failed_attempts` failures so far
    pub fn backoff_after(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(16);
        self.initial_backoff.saturating_mul(1u32 << exponent)
    }
}

/// Outcome of a successful delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub attempts: u32,
    pub status: u16,
}

/// Delivers processing results to caller webhooks
#[derive(Clone)]
pub struct CallbackClient {
    client: Client,
    tokens: Arc<dyn TokenIssuer>,
    audience: Option<String>,
    policy: RetryPolicy,
}

impl CallbackClient {
    pub fn new(
        client: Client,
        tokens: Arc<dyn TokenIssuer>,
        audience: Option<String>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            client,
            tokens,
            audience,
            policy,
        }
    }

    /// Deliver `result` to `url`, retrying per the policy
    pub async fn deliver(
        &self,
        url: &str,
        result: &ProcessingResult,
    ) -> Result<DeliveryReport, CallbackDeliveryError> {
        let target = Url::parse(url).map_err(|_| CallbackDeliveryError::InvalidUrl {
            url: url.to_string(),
        })?;
        let audience = match &self.audience {
            Some(audience) => audience.clone(),
            None => target.origin().ascii_serialization(),
        };

        let mut attempt = 0;
        loop {
            attempt += 1;

            match self.attempt(&target, &audience, result).await {
                Ok(status) => {
                    counter!("docproc_callback_attempts_total", "outcome" => "delivered")
                        .increment(1);
                    info!(
                        job_id = %result.id(),
                        attempt,
                        "Callback delivered"
                    );
                    return Ok(DeliveryReport {
                        attempts: attempt,
                        status,
                    });
                }
                Err(e) => {
                    counter!("docproc_callback_attempts_total", "outcome" => "failed").increment(1);

                    if attempt >= self.policy.max_attempts {
                        counter!("docproc_callback_exhausted_total").increment(1);
                        return Err(CallbackDeliveryError::Exhausted {
                            attempts: attempt,
                            last_error: e,
                        });
                    }

                    let backoff = self.policy.backoff_after(attempt);
                    warn!(
                        job_id = %result.id(),
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %crate::error::format_error_chain(&e),
                        "Callback attempt failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    async fn attempt(
        &self,
        target: &Url,
        audience: &str,
        result: &ProcessingResult,
    ) -> Result<u16, CallbackAttemptError> {
        let token = self.tokens.issue(audience).await?;

        let response = self
            .client
            .post(target.clone())
            .header(header::CONTENT_TYPE, "application/json")
            .bearer_auth(token)
            .timeout(self.policy.request_timeout)
            .json(result)
            .send()
            .await
            .map_err(CallbackAttemptError::Transport)?;

        let status = response.status();
        debug!(job_id = %result.id(), status = status.as_u16(), "Callback response");

        if status == StatusCode::OK {
            Ok(status.as_u16())
        } else {
            Err(CallbackAttemptError::Status {
                status: status.as_u16(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthError;
    use crate::job::tests::sample_job;
    use crate::token::StaticTokenIssuer;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn policy(initial_ms: u64) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(initial_ms),
            request_timeout: Duration::from_secs(5),
        }
    }

    fn client(policy: RetryPolicy) -> CallbackClient {
        CallbackClient::new(
            Client::new(),
            Arc::new(StaticTokenIssuer::new("cb-token")),
            None,
            policy,
        )
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = policy(1000);
        assert_eq!(policy.backoff_after(1), Duration::from_secs(1));
        assert_eq!(policy.backoff_after(2), Duration::from_secs(2));
        assert_eq!(policy.backoff_after(3), Duration::from_secs(4));
    }

    #[test]
    fn test_policy_from_default_config() {
        let config = crate::config::ServiceConfig::default().callback;
        let policy = RetryPolicy::from_config(&config);
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_backoff, Duration::from_secs(1));
        assert_eq!(policy.request_timeout, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_delivers_on_first_attempt_with_bearer_token() {
        let server = MockServer::start().await;
        let job = sample_job("J1");
        let result = ProcessingResult::success(&job, r#"{"total":42}"#.to_string());

        Mock::given(method("POST"))
            .and(path("/callback"))
            .and(header("authorization", "Bearer cb-token"))
            .and(header("content-type", "application/json"))
            .and(body_json(serde_json::json!({
                "id": "J1",
                "name": "invoice.pdf",
                "type": "INVOICE",
                "parsed_data": "{\"total\":42}",
                "metadata": {},
                "error": null
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let report = client(policy(10))
            .deliver(&format!("{}/callback", server.uri()), &result)
            .await
            .unwrap();
        assert_eq!(report.attempts, 1);
        assert_eq!(report.status, 200);
    }

    /// Issues a token and records when each attempt started
    struct TimedIssuer {
        issued_at: std::sync::Mutex<Vec<Instant>>,
    }

    #[async_trait]
    impl TokenIssuer for TimedIssuer {
        async fn issue(&self, _audience: &str) -> Result<String, AuthError> {
            self.issued_at.lock().unwrap().push(Instant::now());
            Ok("cb-token".to_string())
        }
    }

    #[tokio::test]
    async fn test_retries_until_ok_with_exponential_backoff() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let issuer = Arc::new(TimedIssuer {
            issued_at: std::sync::Mutex::new(Vec::new()),
        });
        let client = CallbackClient::new(Client::new(), issuer.clone(), None, policy(100));

        let result = ProcessingResult::success(&sample_job("J4"), "abc".to_string());
        let report = client
            .deliver(&format!("{}/callback", server.uri()), &result)
            .await
            .unwrap();
        assert_eq!(report.attempts, 3);

        let issued_at = issuer.issued_at.lock().unwrap().clone();
        assert_eq!(issued_at.len(), 3);
        let first_gap = issued_at[1] - issued_at[0];
        let second_gap = issued_at[2] - issued_at[1];

        // 100ms then 200ms, plus one local round trip each
        assert!(
            first_gap >= Duration::from_millis(100) && first_gap < Duration::from_millis(180),
            "first gap was {:?}",
            first_gap
        );
        assert!(
            second_gap >= Duration::from_millis(200) && second_gap < Duration::from_millis(280),
            "second gap was {:?}",
            second_gap
        );
    }

    #[tokio::test]
    async fn test_non_200_success_codes_are_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(202))
            .expect(3)
            .mount(&server)
            .await;

        let result = ProcessingResult::success(&sample_job("J5"), "abc".to_string());
        let err = client(policy(1))
            .deliver(&format!("{}/callback", server.uri()), &result)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            CallbackDeliveryError::Exhausted {
                attempts: 3,
                last_error: CallbackAttemptError::Status { status: 202 }
            }
        ));
    }

    #[tokio::test]
    async fn test_no_wait_after_final_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let result = ProcessingResult::failure(&sample_job("J6"), "boom");
        let started = Instant::now();
        let err = client(policy(200))
            .deliver(&format!("{}/callback", server.uri()), &result)
            .await
            .unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, CallbackDeliveryError::Exhausted { attempts: 3, .. }));
        // 200ms + 400ms of backoff; a trailing 800ms wait would push this past 1.4s
        assert!(elapsed >= Duration::from_millis(600));
        assert!(elapsed < Duration::from_millis(1400));
    }

    struct FlakyIssuer {
        calls: AtomicU32,
    }

    #[async_trait]
    impl TokenIssuer for FlakyIssuer {
        async fn issue(&self, audience: &str) -> Result<String, AuthError> {
            assert_eq!(audience, "https://audience.example.com");
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(AuthError::EmptyToken)
            } else {
                Ok("fresh".to_string())
            }
        }
    }

    #[tokio::test]
    async fn test_token_failure_counts_as_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("authorization", "Bearer fresh"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let issuer = Arc::new(FlakyIssuer {
            calls: AtomicU32::new(0),
        });
        let client = CallbackClient::new(
            Client::new(),
            issuer.clone(),
            Some("https://audience.example.com".to_string()),
            policy(1),
        );

        let result = ProcessingResult::success(&sample_job("J7"), "abc".to_string());
        let report = client
            .deliver(&format!("{}/callback", server.uri()), &result)
            .await
            .unwrap();

        assert_eq!(report.attempts, 2);
        assert_eq!(issuer.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalid_url_is_not_retried() {
        let result = ProcessingResult::success(&sample_job("J8"), "abc".to_string());
        let err = client(policy(1000))
            .deliver("not a url", &result)
            .await
            .unwrap_err();
        assert!(matches!(err, CallbackDeliveryError::InvalidUrl { .. }));
    }
}

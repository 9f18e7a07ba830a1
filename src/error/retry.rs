//! Retry engine with exponential backoff and graceful degradation.
//!
//! Each [`ErrorKind`] has a fixed [`RetryPolicy`], or none for kinds that
//! must never be retried. The engine classifies every failure and stops as
//! soon as a classified failure is non-retryable, whatever the policy says.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use rand::RngExt;
use serde::{Deserialize, Serialize};

use super::{BoxError, ErrorClassifier, ErrorContext, ErrorKind, ReviewError};
use crate::logging::LogScope;

/// Backoff parameters for one error kind.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay_ms: u64,
    /// Upper bound for the exponential part of the delay.
    pub max_delay_ms: u64,
    /// Growth factor applied per attempt.
    pub backoff_multiplier: f64,
    /// Upper bound of the uniform random jitter added to every delay.
    pub jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
            jitter_ms: 500,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with the given parameters.
    pub fn new(
        max_attempts: u32,
        base_delay_ms: u64,
        max_delay_ms: u64,
        backoff_multiplier: f64,
        jitter_ms: u64,
    ) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
            max_delay_ms,
            backoff_multiplier,
            jitter_ms,
        }
    }

    /// The built-in policy for a kind; `None` for kinds that are never retried.
    pub fn default_for(kind: ErrorKind) -> Option<Self> {
        match kind {
            ErrorKind::RepositoryNotDetected
            | ErrorKind::AuthenticationFailed
            | ErrorKind::PermissionDenied
            | ErrorKind::FileNotFound
            | ErrorKind::InvalidConfiguration => None,
            ErrorKind::ApiRateLimited => Some(Self::new(5, 5_000, 60_000, 2.0, 1_000)),
            ErrorKind::NetworkError => Some(Self::new(3, 1_000, 10_000, 2.0, 500)),
            ErrorKind::ServiceUnavailable => Some(Self::new(4, 2_000, 30_000, 2.0, 1_000)),
            ErrorKind::TimeoutError => Some(Self::new(2, 1_000, 5_000, 1.5, 250)),
            ErrorKind::GitOperationFailed => Some(Self::new(3, 500, 5_000, 2.0, 250)),
            ErrorKind::CommentPostFailed => Some(Self::new(3, 1_000, 10_000, 2.0, 500)),
            ErrorKind::LlmProviderError => Some(Self::new(3, 2_000, 30_000, 2.0, 1_000)),
            ErrorKind::AnalysisFailed => Some(Self::new(2, 1_000, 5_000, 2.0, 250)),
        }
    }

    /// Delay after the given failed attempt (1-based), without jitter:
    /// `min(base * multiplier^(attempt - 1), max)`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let raw = self.base_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        let capped = raw.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    /// Delay after the given failed attempt with uniform jitter in
    /// `[0, jitter_ms]` added.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let jitter = if self.jitter_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..=self.jitter_ms)
        };
        self.backoff_delay(attempt) + Duration::from_millis(jitter)
    }
}

/// Executes fallible operations under per-kind retry policies.
#[derive(Debug)]
pub struct RetryEngine {
    classifier: ErrorClassifier,
    policies: HashMap<ErrorKind, Option<RetryPolicy>>,
    scope: LogScope,
}

impl Default for RetryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryEngine {
    /// Creates an engine with the built-in classifier and policy table.
    pub fn new() -> Self {
        let policies = ErrorKind::ALL
            .iter()
            .map(|kind| (*kind, RetryPolicy::default_for(*kind)))
            .collect();
        Self {
            classifier: ErrorClassifier::new(),
            policies,
            scope: LogScope::new("retry"),
        }
    }

    /// Replaces the classifier.
    pub fn with_classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Sets the policy for a kind. `None` disables retries for that kind.
    ///
    /// Non-retryable kinds keep `None`: their failures stop after one
    /// attempt regardless of any policy.
    pub fn with_policy(mut self, kind: ErrorKind, policy: Option<RetryPolicy>) -> Self {
        let policy = if kind.is_retryable() { policy } else { None };
        self.policies.insert(kind, policy);
        self
    }

    /// Sets the logging scope.
    pub fn with_scope(mut self, scope: LogScope) -> Self {
        self.scope = scope;
        self
    }

    /// The classifier used for raw failures.
    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    /// Classifies a raw failure.
    pub fn classify(
        &self,
        error: &(dyn std::error::Error + 'static),
        context: &ErrorContext,
    ) -> ReviewError {
        self.classifier.classify(error, context)
    }

    /// The policy for a kind, or `None` if it is never retried.
    pub fn policy_for(&self, kind: ErrorKind) -> Option<&RetryPolicy> {
        self.policies.get(&kind).and_then(Option::as_ref)
    }

    /// The guidance string for a kind.
    pub fn guidance_for(&self, kind: ErrorKind) -> &'static str {
        kind.guidance()
    }

    /// Whether the error may succeed on retry.
    pub fn is_retryable(&self, error: &ReviewError) -> bool {
        error.is_retryable()
    }

    /// Runs `op`, retrying failures under the policy for `kind`.
    ///
    /// `override_policy` replaces the kind's policy, which also enables
    /// retries for a kind whose policy is `None`. Classified failures that
    /// are not retryable are returned after the attempt that produced them.
    /// On exhaustion the classified final failure is returned with an
    /// `attempts` detail.
    pub async fn with_retry<T, F, Fut>(
        &self,
        mut op: F,
        kind: ErrorKind,
        context: &ErrorContext,
        override_policy: Option<&RetryPolicy>,
    ) -> Result<T, ReviewError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BoxError>>,
    {
        let policy = override_policy.or_else(|| self.policy_for(kind));
        let max_attempts = policy.map_or(1, |p| p.max_attempts.max(1));

        let mut attempt: u32 = 1;
        loop {
            let raw = match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!(
                            scope = %self.scope,
                            operation = context.operation(),
                            attempt,
                            "succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(raw) => raw,
            };

            let error = self
                .classifier
                .classify(&*raw, context)
                .with_detail("retry_kind", kind.as_str());

            let next_delay = match policy {
                Some(policy) if error.retryable && attempt < max_attempts => {
                    policy.delay_for_attempt(attempt)
                }
                _ => {
                    if attempt > 1 {
                        tracing::warn!(
                            scope = %self.scope,
                            operation = context.operation(),
                            kind = %error.kind,
                            attempts = attempt,
                            "retries exhausted"
                        );
                    }
                    return Err(error.with_detail("attempts", attempt.to_string()));
                }
            };

            tracing::warn!(
                scope = %self.scope,
                operation = context.operation(),
                kind = %error.kind,
                attempt,
                max_attempts,
                delay_ms = next_delay.as_millis() as u64,
                "attempt failed, retrying: {}",
                error.message
            );
            tokio::time::sleep(next_delay).await;
            attempt += 1;
        }
    }

    /// Runs `primary` through [`with_retry`](Self::with_retry); if it still
    /// fails, runs `fallback` once.
    ///
    /// When the fallback fails too, the primary's error is returned with the
    /// fallback's message recorded under `fallback_error`.
    pub async fn with_graceful_degradation<T, P, PFut, B, BFut>(
        &self,
        primary: P,
        fallback: B,
        kind: ErrorKind,
        context: &ErrorContext,
    ) -> Result<T, ReviewError>
    where
        P: FnMut() -> PFut,
        PFut: Future<Output = Result<T, BoxError>>,
        B: FnOnce() -> BFut,
        BFut: Future<Output = Result<T, BoxError>>,
    {
        let primary_error = match self.with_retry(primary, kind, context, None).await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        tracing::warn!(
            scope = %self.scope,
            operation = context.operation(),
            kind = %primary_error.kind,
            "primary operation failed, running fallback"
        );

        match fallback().await {
            Ok(value) => Ok(value),
            Err(fallback_error) => {
                tracing::debug!(
                    scope = %self.scope,
                    operation = context.operation(),
                    "fallback failed: {}",
                    fallback_error
                );
                Err(primary_error.with_detail("fallback_error", fallback_error.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, 1, 2, 2.0, 0)
    }

    fn fast_engine() -> RetryEngine {
        ErrorKind::ALL
            .iter()
            .fold(RetryEngine::new(), |engine, kind| {
                let policy = RetryPolicy::default_for(*kind).map(|p| RetryPolicy {
                    base_delay_ms: 1,
                    max_delay_ms: 2,
                    jitter_ms: 0,
                    ..p
                });
                engine.with_policy(*kind, policy)
            })
    }

    fn failure(message: &str) -> BoxError {
        message.to_string().into()
    }

    #[test]
    fn test_backoff_delay_grows_and_caps() {
        let policy = RetryPolicy::new(5, 100, 500, 2.0, 0);
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_delay(3), Duration::from_millis(400));
        assert_eq!(policy.backoff_delay(4), Duration::from_millis(500));
        assert_eq!(policy.backoff_delay(40), Duration::from_millis(500));
    }

    #[test]
    fn test_delay_jitter_stays_in_range() {
        let policy = RetryPolicy::new(3, 100, 1_000, 2.0, 50);
        for _ in 0..100 {
            let delay = policy.delay_for_attempt(2);
            assert!(delay >= Duration::from_millis(200));
            assert!(delay <= Duration::from_millis(250));
        }
    }

    #[test]
    fn test_default_policy_table() {
        for kind in ErrorKind::ALL {
            assert_eq!(
                RetryPolicy::default_for(kind).is_some(),
                kind.is_retryable(),
                "policy presence mismatch for {}",
                kind
            );
        }
        let rate = RetryPolicy::default_for(ErrorKind::ApiRateLimited).unwrap();
        let timeout = RetryPolicy::default_for(ErrorKind::TimeoutError).unwrap();
        assert!(rate.max_attempts > timeout.max_attempts);
        assert!(rate.base_delay_ms > timeout.base_delay_ms);
    }

    #[test]
    fn test_with_policy_cannot_enable_non_retryable_kind() {
        let engine = RetryEngine::new().with_policy(ErrorKind::FileNotFound, Some(fast_policy(5)));
        assert!(engine.policy_for(ErrorKind::FileNotFound).is_none());
        assert_eq!(
            engine.guidance_for(ErrorKind::FileNotFound),
            ErrorKind::FileNotFound.guidance()
        );
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let engine = RetryEngine::new();
        let calls = AtomicU32::new(0);

        let result = engine
            .with_retry(
                || {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    async move {
                        if n < 3 {
                            Err(failure("connection reset by peer"))
                        } else {
                            Ok(n)
                        }
                    }
                },
                ErrorKind::NetworkError,
                &ErrorContext::new("fetch"),
                Some(&fast_policy(4)),
            )
            .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_returns_classified_error() {
        let engine = fast_engine();
        let calls = AtomicU32::new(0);

        let result: Result<(), ReviewError> = engine
            .with_retry(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(failure("503 Service Unavailable")) }
                },
                ErrorKind::ServiceUnavailable,
                &ErrorContext::new("fetch"),
                None,
            )
            .await;

        let error = result.unwrap_err();
        assert_eq!(error.kind, ErrorKind::ServiceUnavailable);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(error.details.get("attempts"), Some(&"4".to_string()));
        assert_eq!(error.details.get("operation"), Some(&"fetch".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleeps_between_attempts_only() {
        let engine = RetryEngine::new();
        let policy = RetryPolicy::new(3, 100, 10_000, 2.0, 0);
        let attempts = std::sync::Mutex::new(Vec::new());
        let start = tokio::time::Instant::now();

        let result: Result<(), ReviewError> = engine
            .with_retry(
                || {
                    attempts.lock().unwrap().push(tokio::time::Instant::now());
                    async { Err(failure("503 Service Unavailable")) }
                },
                ErrorKind::ServiceUnavailable,
                &ErrorContext::new("fetch"),
                Some(&policy),
            )
            .await;

        assert_eq!(result.unwrap_err().details.get("attempts"), Some(&"3".to_string()));
        let attempts = attempts.into_inner().unwrap();
        let gaps: Vec<Duration> = attempts.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(gaps, vec![Duration::from_millis(100), Duration::from_millis(200)]);
        assert_eq!(start.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_non_retryable_kind_runs_once() {
        let engine = RetryEngine::new();
        let calls = AtomicU32::new(0);

        let result: Result<(), ReviewError> = engine
            .with_retry(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(failure("boom")) }
                },
                ErrorKind::AuthenticationFailed,
                &ErrorContext::new("login"),
                None,
            )
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_non_retryable_failure_ignores_override() {
        let engine = RetryEngine::new();
        let calls = AtomicU32::new(0);

        let result: Result<(), ReviewError> = engine
            .with_retry(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(failure("401 Unauthorized")) }
                },
                ErrorKind::NetworkError,
                &ErrorContext::new("fetch"),
                Some(&fast_policy(5)),
            )
            .await;

        let error = result.unwrap_err();
        assert_eq!(error.kind, ErrorKind::AuthenticationFailed);
        assert!(!error.retryable);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_override_enables_retry_for_unpolicied_kind() {
        let engine = RetryEngine::new();
        let calls = AtomicU32::new(0);

        let result = engine
            .with_retry(
                || {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    async move {
                        if n == 1 {
                            Err(failure("flaky"))
                        } else {
                            Ok("done")
                        }
                    }
                },
                ErrorKind::InvalidConfiguration,
                &ErrorContext::new("load"),
                Some(&fast_policy(2)),
            )
            .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_review_error_passes_through_unchanged_kind() {
        let engine = fast_engine();

        let result: Result<(), ReviewError> = engine
            .with_retry(
                || async {
                    Err(Box::new(ReviewError::new(
                        ErrorKind::RepositoryNotDetected,
                        "no repo",
                    )) as BoxError)
                },
                ErrorKind::AnalysisFailed,
                &ErrorContext::new("detect"),
                None,
            )
            .await;

        let error = result.unwrap_err();
        assert_eq!(error.kind, ErrorKind::RepositoryNotDetected);
        assert_eq!(error.details.get("attempts"), Some(&"1".to_string()));
    }

    #[tokio::test]
    async fn test_degradation_primary_success_skips_fallback() {
        let engine = fast_engine();
        let fallback_calls = AtomicU32::new(0);

        let result = engine
            .with_graceful_degradation(
                || async { Ok::<_, BoxError>("primary") },
                || {
                    fallback_calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok("fallback") }
                },
                ErrorKind::LlmProviderError,
                &ErrorContext::new("summarize"),
            )
            .await;

        assert_eq!(result, Ok("primary"));
        assert_eq!(fallback_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_degradation_uses_fallback_value() {
        let engine = fast_engine();

        let result = engine
            .with_graceful_degradation(
                || async { Err::<&str, _>(failure("model overloaded")) },
                || async { Ok("fallback") },
                ErrorKind::LlmProviderError,
                &ErrorContext::new("summarize"),
            )
            .await;

        assert_eq!(result, Ok("fallback"));
    }

    #[tokio::test]
    async fn test_degradation_both_fail_returns_primary_error() {
        let engine = fast_engine();

        let result: Result<(), ReviewError> = engine
            .with_graceful_degradation(
                || async { Err(failure("rate limit exceeded")) },
                || async { Err(failure("permission denied")) },
                ErrorKind::ApiRateLimited,
                &ErrorContext::new("post"),
            )
            .await;

        let error = result.unwrap_err();
        assert_eq!(error.kind, ErrorKind::ApiRateLimited);
        assert_eq!(error.message, "rate limit exceeded");
        assert_eq!(
            error.details.get("fallback_error"),
            Some(&"permission denied".to_string())
        );
    }
}

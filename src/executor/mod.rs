//! Batch executors.
//!
//! A [`JobProcessor`] supplied by the caller analyzes one target at a time.
//! The executors drive it over a batch, map every outcome onto a terminal
//! [`ProcessingResult`] and report progress through a [`ProgressObserver`].
//! A failing target never aborts the batch on its own; only the
//! `continue_on_error` and `max_errors` policies in [`ExecutorOptions`] stop
//! a run early.

pub mod parallel;
pub mod sequential;

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::Instrument;

use crate::cache::ResultCache;
use crate::error::{BoxError, ErrorContext, ErrorKind, ReviewError, RetryEngine};
use crate::logging::LogScope;
use crate::queue::JobStatus;

pub use parallel::{ParallelExecutor, DEFAULT_MAX_CONCURRENCY};
pub use sequential::SequentialExecutor;

/// Verdict reported by an analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewVerdict {
    Approved,
    Warning,
    ChangesRequested,
}

/// What a processor produced for one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisOutcome {
    pub verdict: ReviewVerdict,
    pub summary: String,
    /// Processor-specific findings.
    #[serde(default)]
    pub details: serde_json::Value,
}

impl AnalysisOutcome {
    pub fn new(verdict: ReviewVerdict, summary: impl Into<String>) -> Self {
        Self {
            verdict,
            summary: summary.into(),
            details: serde_json::Value::Null,
        }
    }

    pub fn approved(summary: impl Into<String>) -> Self {
        Self::new(ReviewVerdict::Approved, summary)
    }

    pub fn warning(summary: impl Into<String>) -> Self {
        Self::new(ReviewVerdict::Warning, summary)
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// The caller's analysis capability.
#[async_trait]
pub trait JobProcessor: Send + Sync {
    /// Analyzes one target. `content` is whatever
    /// [`load_content`](Self::load_content) returned for it.
    async fn process(&self, target: &str, content: Option<&str>)
        -> Result<AnalysisOutcome, BoxError>;

    /// Loads the content a target is analyzed from.
    ///
    /// When this returns content and a cache is attached, results are
    /// cached by that content. The default loads nothing.
    async fn load_content(&self, _target: &str) -> Result<Option<String>, BoxError> {
        Ok(None)
    }

    /// Whether a successful outcome carries caveats. The default treats
    /// every verdict other than approved as a warning.
    fn is_warning(&self, outcome: &AnalysisOutcome) -> bool {
        outcome.verdict != ReviewVerdict::Approved
    }
}

/// Terminal record for one target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessingResult {
    pub target: String,
    /// Position in the input.
    pub index: usize,
    /// False exactly when `status` is ERROR.
    pub success: bool,
    pub status: JobStatus,
    pub duration_ms: u64,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<AnalysisOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ReviewError>,
    /// The payload was served from the result cache.
    pub from_cache: bool,
}

/// Batch-level failure policy and retry settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorOptions {
    /// Keep going after a failed target.
    pub continue_on_error: bool,
    /// Stop once this many targets have failed, including the one that hit
    /// the cap. `None` is unbounded.
    pub max_errors: Option<usize>,
    /// Run each target through the retry engine.
    pub retry_failed_jobs: bool,
    /// Policy kind used when retrying targets.
    pub retry_kind: ErrorKind,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            continue_on_error: true,
            max_errors: None,
            retry_failed_jobs: false,
            retry_kind: ErrorKind::AnalysisFailed,
        }
    }
}

impl ExecutorOptions {
    /// Whether a run with `failures` failed targets so far must stop.
    pub fn should_stop(&self, failures: usize) -> bool {
        if failures == 0 {
            return false;
        }
        !self.continue_on_error || self.max_errors.is_some_and(|max| failures >= max)
    }
}

/// Progress callbacks. Every method defaults to doing nothing.
///
/// For a failed target `on_error` is called before `on_complete`.
pub trait ProgressObserver: Send + Sync {
    fn on_start(&self, _index: usize, _total: usize, _target: &str) {}

    fn on_complete(&self, _result: &ProcessingResult) {}

    fn on_error(&self, _target: &str, _error: &ReviewError) {}
}

/// Observer that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ProgressObserver for NoopObserver {}

/// Aggregate counts derived from a result list.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchStats {
    pub total: usize,
    /// Results with `success=true`, warnings included.
    pub successful: usize,
    pub warnings: usize,
    pub failed: usize,
    pub average_duration_ms: f64,
    pub total_duration_ms: u64,
    /// `successful / total`; 0 for an empty list.
    pub success_rate: f64,
}

impl BatchStats {
    pub fn from_results(results: &[ProcessingResult]) -> Self {
        let total = results.len();
        if total == 0 {
            return Self::default();
        }

        let successful = results.iter().filter(|r| r.success).count();
        let warnings = results
            .iter()
            .filter(|r| r.status == JobStatus::Warning)
            .count();
        let total_duration_ms: u64 = results.iter().map(|r| r.duration_ms).sum();

        Self {
            total,
            successful,
            warnings,
            failed: total - successful,
            average_duration_ms: total_duration_ms as f64 / total as f64,
            total_duration_ms,
            success_rate: successful as f64 / total as f64,
        }
    }
}

/// Per-target execution shared by both executors.
#[derive(Debug, Clone)]
pub(crate) struct JobRunner {
    pub(crate) options: ExecutorOptions,
    pub(crate) retry: Arc<RetryEngine>,
    pub(crate) cache: Option<Arc<ResultCache<AnalysisOutcome>>>,
    pub(crate) scope: LogScope,
}

impl JobRunner {
    pub(crate) fn new(options: ExecutorOptions, scope: LogScope) -> Self {
        Self {
            options,
            retry: Arc::new(RetryEngine::new()),
            cache: None,
            scope,
        }
    }

    /// Processes one target and maps the outcome onto a terminal result.
    pub(crate) async fn run_job<P>(&self, processor: &P, target: &str, index: usize) -> ProcessingResult
    where
        P: JobProcessor + ?Sized,
    {
        let span = tracing::debug_span!("job", scope = %self.scope, target, index);
        async {
            let started_at = Utc::now();
            let clock = Instant::now();
            let context = ErrorContext::new("process")
                .with("target", target)
                .with("index", index.to_string());

            let outcome = self.analyze(processor, target, &context).await;
            let duration_ms = clock.elapsed().as_millis() as u64;
            let ended_at = Some(Utc::now());

            match outcome {
                Ok((payload, from_cache)) => {
                    let status = if processor.is_warning(&payload) {
                        JobStatus::Warning
                    } else {
                        JobStatus::Success
                    };
                    tracing::debug!(scope = %self.scope, status = ?status, duration_ms, from_cache, "target finished");
                    ProcessingResult {
                        target: target.to_string(),
                        index,
                        success: true,
                        status,
                        duration_ms,
                        started_at,
                        ended_at,
                        payload: Some(payload),
                        error: None,
                        from_cache,
                    }
                }
                Err(error) => {
                    tracing::warn!(scope = %self.scope, kind = %error.kind, duration_ms, "target failed: {}", error.message);
                    ProcessingResult {
                        target: target.to_string(),
                        index,
                        success: false,
                        status: JobStatus::Error,
                        duration_ms,
                        started_at,
                        ended_at,
                        payload: None,
                        error: Some(error),
                        from_cache: false,
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn analyze<P>(
        &self,
        processor: &P,
        target: &str,
        context: &ErrorContext,
    ) -> Result<(AnalysisOutcome, bool), ReviewError>
    where
        P: JobProcessor + ?Sized,
    {
        let content = match processor.load_content(target).await {
            Ok(content) => content,
            Err(raw) => return Err(self.retry.classify(&*raw, &context.clone().with("stage", "load"))),
        };

        match (&self.cache, content.as_deref()) {
            (Some(cache), Some(content)) => {
                let cached = cache
                    .get_or_compute(target, content, || self.invoke(processor, target, Some(content), context))
                    .await?;
                let from_cache = cached.is_hit();
                Ok((cached.into_inner(), from_cache))
            }
            (_, content) => {
                let outcome = self.invoke(processor, target, content, context).await?;
                Ok((outcome, false))
            }
        }
    }

    async fn invoke<P>(
        &self,
        processor: &P,
        target: &str,
        content: Option<&str>,
        context: &ErrorContext,
    ) -> Result<AnalysisOutcome, ReviewError>
    where
        P: JobProcessor + ?Sized,
    {
        if self.options.retry_failed_jobs {
            self.retry
                .with_retry(
                    || processor.process(target, content),
                    self.options.retry_kind,
                    context,
                    None,
                )
                .await
        } else {
            processor
                .process(target, content)
                .await
                .map_err(|raw| self.retry.classify(&*raw, context))
        }
    }
}

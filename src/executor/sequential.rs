//! One-at-a-time executor.

use std::sync::Arc;

use tracing::Instrument;

use super::{
    AnalysisOutcome, BatchStats, ExecutorOptions, JobProcessor, JobRunner, ProcessingResult,
    ProgressObserver,
};
use crate::cache::ResultCache;
use crate::error::RetryEngine;
use crate::logging::LogScope;
use crate::queue::{JobQueue, JobStatus};

/// Runs targets strictly in input order, each to completion (retry
/// back-off included) before the next one starts.
#[derive(Debug, Clone)]
pub struct SequentialExecutor {
    runner: JobRunner,
}

impl Default for SequentialExecutor {
    fn default() -> Self {
        Self::new(ExecutorOptions::default())
    }
}

impl SequentialExecutor {
    pub fn new(options: ExecutorOptions) -> Self {
        Self {
            runner: JobRunner::new(options, LogScope::new("sequential")),
        }
    }

    /// Shares a retry engine, used for classification and, when
    /// `retry_failed_jobs` is set, for retries.
    pub fn with_retry_engine(mut self, retry: Arc<RetryEngine>) -> Self {
        self.runner.retry = retry;
        self
    }

    /// Attaches a result cache consulted for targets whose content the
    /// processor loads.
    pub fn with_cache(mut self, cache: Arc<ResultCache<AnalysisOutcome>>) -> Self {
        self.runner.cache = Some(cache);
        self
    }

    pub fn with_scope(mut self, scope: LogScope) -> Self {
        self.runner.scope = scope;
        self
    }

    pub fn options(&self) -> &ExecutorOptions {
        &self.runner.options
    }

    /// Processes `targets` in order and returns one result per processed
    /// target, in input order.
    ///
    /// The run ends early after the first failure when `continue_on_error`
    /// is false, or once `max_errors` failures have accumulated. Results
    /// gathered so far, including the failure that stopped the run, are
    /// returned.
    pub async fn run<S, P>(
        &self,
        targets: &[S],
        processor: &P,
        observer: &dyn ProgressObserver,
    ) -> Vec<ProcessingResult>
    where
        S: AsRef<str>,
        P: JobProcessor + ?Sized,
    {
        let scope = &self.runner.scope;
        let total = targets.len();
        let mut queue =
            JobQueue::new(targets.iter().map(|t| t.as_ref())).with_scope(scope.child("queue"));
        let mut results = Vec::with_capacity(total);
        let mut failures = 0usize;

        async {
            tracing::debug!(scope = %scope, total, "starting sequential run");

            while let Some((index, target)) = queue.next().map(|job| (job.index, job.target.clone())) {
                let target = target.as_str();
                observer.on_start(index, total, target);
                queue.update_status_at(index, JobStatus::Processing);

                let result = self.runner.run_job(processor, target, index).await;
                queue.update_status_at(index, result.status);

                if let Some(error) = &result.error {
                    failures += 1;
                    observer.on_error(target, error);
                }
                observer.on_complete(&result);
                results.push(result);

                if self.runner.options.should_stop(failures) {
                    tracing::info!(
                        scope = %scope,
                        failures,
                        processed = index + 1,
                        skipped = total - index - 1,
                        "stopping run after failure limit"
                    );
                    break;
                }
            }

            let stats = queue.stats();
            tracing::debug!(
                scope = %scope,
                success = stats.success,
                warning = stats.warning,
                error = stats.error,
                pending = stats.pending,
                "sequential run finished"
            );
        }
        .instrument(scope.span())
        .await;

        results
    }

    /// Summary statistics for a result list.
    pub fn stats(results: &[ProcessingResult]) -> BatchStats {
        BatchStats::from_results(results)
    }
}

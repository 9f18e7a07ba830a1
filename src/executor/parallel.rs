//! Bounded-concurrency executor.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::Instrument;

use super::{
    AnalysisOutcome, BatchStats, ExecutorOptions, JobProcessor, JobRunner, ProcessingResult,
    ProgressObserver,
};
use crate::cache::ResultCache;
use crate::error::RetryEngine;
use crate::logging::LogScope;
use crate::queue::{JobQueue, JobStatus};

/// Default number of targets processed at once.
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Runs targets concurrently, at most `max_concurrency` at a time, and
/// returns results in input order.
///
/// Targets start in input order as permits free up. Once a failure limit is
/// reached, targets that have not started yet are skipped and left out of
/// the results; targets already in flight run to completion.
#[derive(Debug, Clone)]
pub struct ParallelExecutor {
    runner: JobRunner,
    max_concurrency: usize,
}

impl Default for ParallelExecutor {
    fn default() -> Self {
        Self::new(ExecutorOptions::default())
    }
}

impl ParallelExecutor {
    pub fn new(options: ExecutorOptions) -> Self {
        Self {
            runner: JobRunner::new(options, LogScope::new("parallel")),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }

    /// Sets the concurrency limit. Zero is treated as one.
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    pub fn with_retry_engine(mut self, retry: Arc<RetryEngine>) -> Self {
        self.runner.retry = retry;
        self
    }

    pub fn with_cache(mut self, cache: Arc<ResultCache<AnalysisOutcome>>) -> Self {
        self.runner.cache = Some(cache);
        self
    }

    pub fn with_scope(mut self, scope: LogScope) -> Self {
        self.runner.scope = scope;
        self
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub fn options(&self) -> &ExecutorOptions {
        &self.runner.options
    }

    /// Processes `targets` concurrently and returns the results sorted back
    /// into input order.
    ///
    /// Every target gets a job up front that waits on the semaphore, so the
    /// queue here only tracks statuses; its pending count is the number of
    /// targets skipped after a failure limit.
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
        let semaphore = Semaphore::new(self.max_concurrency);
        let queue = Mutex::new(
            JobQueue::new(targets.iter().map(|t| t.as_ref())).with_scope(scope.child("queue")),
        );
        let failures = AtomicUsize::new(0);
        let halted = AtomicBool::new(false);

        let jobs = targets.iter().enumerate().map(|(index, target)| {
            let target = target.as_ref();
            let (semaphore, queue, failures, halted) = (&semaphore, &queue, &failures, &halted);
            async move {
                let _permit = semaphore.acquire().await.ok()?;
                if halted.load(Ordering::SeqCst) {
                    return None;
                }

                observer.on_start(index, total, target);
                queue
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .update_status_at(index, JobStatus::Processing);

                let result = self.runner.run_job(processor, target, index).await;
                queue
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .update_status_at(index, result.status);

                if let Some(error) = &result.error {
                    let failed = failures.fetch_add(1, Ordering::SeqCst) + 1;
                    observer.on_error(target, error);
                    if self.runner.options.should_stop(failed) && !halted.swap(true, Ordering::SeqCst) {
                        tracing::info!(scope = %scope, failures = failed, "failure limit reached, skipping targets not yet started");
                    }
                }
                observer.on_complete(&result);
                Some(result)
            }
        });

        let mut results: Vec<ProcessingResult> = join_all(jobs)
            .instrument(scope.span())
            .await
            .into_iter()
            .flatten()
            .collect();
        results.sort_by_key(|result| result.index);

        let stats = queue.lock().unwrap_or_else(PoisonError::into_inner).stats();
        tracing::debug!(
            scope = %scope,
            total,
            processed = results.len(),
            skipped = stats.pending,
            max_concurrency = self.max_concurrency,
            "parallel run finished"
        );
        results
    }

    /// Summary statistics for a result list.
    pub fn stats(results: &[ProcessingResult]) -> BatchStats {
        BatchStats::from_results(results)
    }
}

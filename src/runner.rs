// Batch runner
// Picks a processing mode for a batch and dispatches it to the matching executor

use std::sync::Arc;

use serde::Serialize;

use crate::cache::ResultCache;
use crate::config::{ConfigError, ReviewConfig};
use crate::error::RetryEngine;
use crate::executor::{
    AnalysisOutcome, BatchStats, ExecutorOptions, JobProcessor, ParallelExecutor,
    ProcessingResult, ProgressObserver, SequentialExecutor, DEFAULT_MAX_CONCURRENCY,
};
use crate::logging::LogScope;
use crate::mode::{BatchDescriptor, BatchKind, ModeOverrides, ProcessingMode, ProcessingModeSelector};

/// Outcome of one batch
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    /// Kind of the submitted batch
    pub kind: BatchKind,
    /// Mode the batch ran in
    pub mode: ProcessingMode,
    /// One result per processed target, in input order
    pub results: Vec<ProcessingResult>,
    /// Aggregates over `results`
    pub stats: BatchStats,
    /// Targets not processed because a failure limit stopped the run
    pub skipped: usize,
}

impl BatchReport {
    /// Whether any processed target failed
    pub fn has_failures(&self) -> bool {
        self.stats.failed > 0
    }
}

/// Runs whole batches end to end
#[derive(Debug, Clone)]
pub struct BatchRunner {
    selector: ProcessingModeSelector,
    overrides: ModeOverrides,
    options: ExecutorOptions,
    max_concurrency: usize,
    retry: Arc<RetryEngine>,
    cache: Option<Arc<ResultCache<AnalysisOutcome>>>,
    scope: LogScope,
}

impl Default for BatchRunner {
    fn default() -> Self {
        Self::new(ExecutorOptions::default())
    }
}

impl BatchRunner {
    /// Create a runner with no cache and the built-in retry policies
    pub fn new(options: ExecutorOptions) -> Self {
        Self {
            selector: ProcessingModeSelector::new(),
            overrides: ModeOverrides::default(),
            options,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            retry: Arc::new(RetryEngine::new()),
            cache: None,
            scope: LogScope::new("runner"),
        }
    }

    /// Create a runner from configuration
    ///
    /// A fresh cache is created when `cache.enabled` is set.
    pub fn from_config(config: &ReviewConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let runner = Self::new(config.executor.clone())
            .with_overrides(config.mode)
            .with_max_concurrency(config.parallel.max_concurrency)
            .with_retry_engine(Arc::new(config.retry_engine()?));

        Ok(if config.cache.enabled {
            runner.with_cache(Arc::new(ResultCache::from_config(&config.cache)))
        } else {
            runner
        })
    }

    pub fn with_overrides(mut self, overrides: ModeOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    pub fn with_retry_engine(mut self, retry: Arc<RetryEngine>) -> Self {
        self.retry = retry;
        self
    }

    /// Share a cache across batches
    pub fn with_cache(mut self, cache: Arc<ResultCache<AnalysisOutcome>>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_scope(mut self, scope: LogScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn cache(&self) -> Option<&Arc<ResultCache<AnalysisOutcome>>> {
        self.cache.as_ref()
    }

    pub fn retry_engine(&self) -> &Arc<RetryEngine> {
        &self.retry
    }

    /// The mode a batch would run in
    pub fn mode_for(&self, batch: &BatchDescriptor) -> ProcessingMode {
        self.selector
            .determine_mode_advanced(batch, batch.targets.len(), self.overrides)
    }

    /// Run one batch
    pub async fn run<P>(
        &self,
        batch: &BatchDescriptor,
        processor: &P,
        observer: &dyn ProgressObserver,
    ) -> BatchReport
    where
        P: JobProcessor + ?Sized,
    {
        let decision = self.selector.explain(batch, self.overrides);
        let mode = self.mode_for(batch);
        tracing::info!(
            scope = %self.scope,
            kind = %batch.kind,
            targets = batch.targets.len(),
            mode = %mode,
            reason = decision.reason,
            "running batch"
        );

        let results = match mode {
            ProcessingMode::Sequential => {
                self.sequential()
                    .run(&batch.targets, processor, observer)
                    .await
            }
            ProcessingMode::Parallel => {
                self.parallel()
                    .run(&batch.targets, processor, observer)
                    .await
            }
        };

        let stats = BatchStats::from_results(&results);
        let skipped = batch.targets.len() - results.len();
        tracing::info!(
            scope = %self.scope,
            successful = stats.successful,
            warnings = stats.warnings,
            failed = stats.failed,
            skipped,
            "batch finished"
        );

        BatchReport {
            kind: batch.kind,
            mode,
            results,
            stats,
            skipped,
        }
    }

    fn sequential(&self) -> SequentialExecutor {
        let executor = SequentialExecutor::new(self.options.clone())
            .with_retry_engine(Arc::clone(&self.retry))
            .with_scope(self.scope.child("sequential"));
        match &self.cache {
            Some(cache) => executor.with_cache(Arc::clone(cache)),
            None => executor,
        }
    }

    fn parallel(&self) -> ParallelExecutor {
        let executor = ParallelExecutor::new(self.options.clone())
            .with_max_concurrency(self.max_concurrency)
            .with_retry_engine(Arc::clone(&self.retry))
            .with_scope(self.scope.child("parallel"));
        match &self.cache {
            Some(cache) => executor.with_cache(Arc::clone(cache)),
            None => executor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use crate::executor::NoopObserver;
    use async_trait::async_trait;

    struct Echo;

    #[async_trait]
    impl JobProcessor for Echo {
        async fn process(&self, target: &str, _content: Option<&str>) -> Result<AnalysisOutcome, BoxError> {
            if target.starts_with("bad") {
                return Err("analysis crashed".into());
            }
            Ok(AnalysisOutcome::approved(target))
        }

        async fn load_content(&self, target: &str) -> Result<Option<String>, BoxError> {
            Ok(Some(target.to_uppercase()))
        }
    }

    #[tokio::test]
    async fn test_files_batch_runs_sequentially() {
        let runner = BatchRunner::default();
        let batch = BatchDescriptor::new(BatchKind::Files, ["a.rs", "bad.rs", "c.rs"]);

        let report = runner.run(&batch, &Echo, &NoopObserver).await;

        assert_eq!(report.mode, ProcessingMode::Sequential);
        assert_eq!(report.results.len(), 3);
        assert_eq!(report.stats.failed, 1);
        assert_eq!(report.skipped, 0);
        assert!(report.has_failures());
    }

    #[tokio::test]
    async fn test_pr_batch_runs_in_parallel() {
        let runner = BatchRunner::default().with_max_concurrency(2);
        let batch = BatchDescriptor::new(BatchKind::Pr, ["x.rs", "y.rs", "z.rs"]);

        let report = runner.run(&batch, &Echo, &NoopObserver).await;

        assert_eq!(report.mode, ProcessingMode::Parallel);
        let order: Vec<&str> = report.results.iter().map(|r| r.target.as_str()).collect();
        assert_eq!(order, vec!["x.rs", "y.rs", "z.rs"]);
        assert!(!report.has_failures());
    }

    #[tokio::test]
    async fn test_overrides_and_skipped_count() {
        let runner = BatchRunner::new(ExecutorOptions {
            continue_on_error: false,
            ..ExecutorOptions::default()
        })
        .with_overrides(ModeOverrides {
            force_sequential: true,
            force_parallel: true,
        });
        let batch = BatchDescriptor::new(BatchKind::Pr, ["bad1", "b", "c"]);

        let report = runner.run(&batch, &Echo, &NoopObserver).await;

        assert_eq!(report.mode, ProcessingMode::Sequential);
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.skipped, 2);
    }

    #[tokio::test]
    async fn test_from_config_shares_cache_across_batches() {
        let config = ReviewConfig::from_toml_str("[cache]\nmemory_budget_bytes = 100000").unwrap();
        let runner = BatchRunner::from_config(&config).unwrap();
        let batch = BatchDescriptor::new(BatchKind::Files, ["a.rs", "b.rs"]);

        runner.run(&batch, &Echo, &NoopObserver).await;
        let second = runner.run(&batch, &Echo, &NoopObserver).await;

        assert!(second.results.iter().all(|r| r.from_cache));
        let metrics = runner.cache().map(|c| c.metrics()).unwrap();
        assert_eq!(metrics.hits, 2);
        assert_eq!(metrics.misses, 2);
    }

    #[test]
    fn test_from_config_without_cache() {
        let config = ReviewConfig::from_toml_str("[cache]\nenabled = false").unwrap();
        let runner = BatchRunner::from_config(&config).unwrap();
        assert!(runner.cache().is_none());
    }
}

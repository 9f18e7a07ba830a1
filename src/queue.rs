//! Ordered job queue with per-item status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::logging::LogScope;

/// Lifecycle state of a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Processing,
    Success,
    Warning,
    Error,
}

impl JobStatus {
    /// Returns true for SUCCESS, WARNING and ERROR.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Warning | JobStatus::Error)
    }

    fn rank(&self) -> u8 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::Processing => 1,
            JobStatus::Success | JobStatus::Warning | JobStatus::Error => 2,
        }
    }

    /// Whether a job may move from `self` to `next`. Only forward moves are
    /// legal; a pending job may jump straight to a terminal status.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        next.rank() > self.rank()
    }
}

/// One target in the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueuedJob {
    pub target: String,
    pub status: JobStatus,
    /// Position in the original input; never changes.
    pub index: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// Count of jobs per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub success: usize,
    pub warning: usize,
    pub error: usize,
}

/// Targets in input order with mutable status.
///
/// Status changes never reorder the queue. Duplicate targets are allowed;
/// [`update_status`](Self::update_status) addresses the first one for which
/// the transition is legal, and [`update_status_at`](Self::update_status_at)
/// addresses a job by position.
#[derive(Debug, Clone)]
pub struct JobQueue {
    jobs: Vec<QueuedJob>,
    scope: LogScope,
}

impl JobQueue {
    /// Creates a queue with every target pending.
    pub fn new<I, S>(targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let jobs = targets
            .into_iter()
            .enumerate()
            .map(|(index, target)| QueuedJob {
                target: target.into(),
                status: JobStatus::Pending,
                index,
                started_at: None,
                ended_at: None,
            })
            .collect();
        Self {
            jobs,
            scope: LogScope::new("queue"),
        }
    }

    /// Sets the logging scope.
    pub fn with_scope(mut self, scope: LogScope) -> Self {
        self.scope = scope;
        self
    }

    /// Moves the job for `target` to `status`.
    ///
    /// Unknown targets and illegal transitions are logged and ignored.
    /// Returns true if a job was updated.
    pub fn update_status(&mut self, target: &str, status: JobStatus) -> bool {
        let mut known = false;
        let position = self.jobs.iter().position(|job| {
            if job.target != target {
                return false;
            }
            known = true;
            job.status.can_transition_to(status)
        });

        match position {
            Some(index) => self.update_status_at(index, status),
            None => {
                if known {
                    tracing::warn!(scope = %self.scope, target, to = ?status, "illegal status transition ignored");
                } else {
                    tracing::warn!(scope = %self.scope, target, "status update for unknown target ignored");
                }
                false
            }
        }
    }

    /// Moves the job at `index` to `status`.
    ///
    /// Stamps `started_at` on entering PROCESSING and `ended_at` on entering
    /// a terminal status. Returns false for an out-of-range index or an
    /// illegal transition.
    pub fn update_status_at(&mut self, index: usize, status: JobStatus) -> bool {
        let scope = &self.scope;
        let Some(job) = self.jobs.get_mut(index) else {
            tracing::warn!(scope = %scope, index, "status update for unknown index ignored");
            return false;
        };
        if !job.status.can_transition_to(status) {
            tracing::warn!(
                scope = %scope,
                target = %job.target,
                from = ?job.status,
                to = ?status,
                "illegal status transition ignored"
            );
            return false;
        }

        let now = Utc::now();
        if status == JobStatus::Processing && job.started_at.is_none() {
            job.started_at = Some(now);
        }
        if status.is_terminal() {
            job.ended_at = Some(now);
        }
        job.status = status;
        true
    }

    /// Jobs with the given status, in input order.
    pub fn get_by_status(&self, status: JobStatus) -> Vec<&QueuedJob> {
        self.jobs.iter().filter(|job| job.status == status).collect()
    }

    /// The first pending job in input order.
    pub fn next(&self) -> Option<&QueuedJob> {
        self.jobs.iter().find(|job| job.status == JobStatus::Pending)
    }

    /// True once no job is pending or processing.
    pub fn is_complete(&self) -> bool {
        self.jobs.iter().all(|job| job.status.is_terminal())
    }

    pub fn stats(&self) -> QueueStats {
        let mut stats = QueueStats {
            total: self.jobs.len(),
            ..QueueStats::default()
        };
        for job in &self.jobs {
            match job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Processing => stats.processing += 1,
                JobStatus::Success => stats.success += 1,
                JobStatus::Warning => stats.warning += 1,
                JobStatus::Error => stats.error += 1,
            }
        }
        stats
    }

    /// Returns every job to PENDING and clears timestamps. Order is kept.
    pub fn reset(&mut self) {
        for job in &mut self.jobs {
            job.status = JobStatus::Pending;
            job.started_at = None;
            job.ended_at = None;
        }
    }

    /// All jobs in input order.
    pub fn get_all(&self) -> &[QueuedJob] {
        &self.jobs
    }

    /// Targets in input order.
    pub fn get_processing_order(&self) -> Vec<&str> {
        self.jobs.iter().map(|job| job.target.as_str()).collect()
    }

    /// The first job for a target.
    pub fn get(&self, target: &str) -> Option<&QueuedJob> {
        self.jobs.iter().find(|job| job.target == target)
    }

    pub fn get_at(&self, index: usize) -> Option<&QueuedJob> {
        self.jobs.get(index)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> JobQueue {
        JobQueue::new(["a.ts", "b.ts", "c.ts"])
    }

    #[test]
    fn test_new_queue_is_pending_in_order() {
        let queue = queue();
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.get_processing_order(), vec!["a.ts", "b.ts", "c.ts"]);
        assert_eq!(queue.stats().pending, 3);
        assert_eq!(queue.next().map(|job| job.target.as_str()), Some("a.ts"));
        assert!(!queue.is_complete());
        assert_eq!(queue.get_at(2).map(|job| job.index), Some(2));
    }

    #[test]
    fn test_timestamps_are_stamped() {
        let mut queue = queue();
        assert!(queue.update_status("b.ts", JobStatus::Processing));
        let job = queue.get("b.ts").unwrap();
        assert!(job.started_at.is_some());
        assert!(job.ended_at.is_none());

        assert!(queue.update_status("b.ts", JobStatus::Warning));
        let job = queue.get("b.ts").unwrap();
        assert!(job.ended_at.is_some());
        assert!(job.ended_at >= job.started_at);
    }

    #[test]
    fn test_backward_transitions_are_rejected() {
        let mut queue = queue();
        queue.update_status("a.ts", JobStatus::Processing);
        queue.update_status("a.ts", JobStatus::Success);

        assert!(!queue.update_status("a.ts", JobStatus::Pending));
        assert!(!queue.update_status("a.ts", JobStatus::Processing));
        assert!(!queue.update_status("a.ts", JobStatus::Error));
        assert_eq!(queue.get("a.ts").unwrap().status, JobStatus::Success);
    }

    #[test]
    fn test_unknown_target_is_ignored() {
        let mut queue = queue();
        assert!(!queue.update_status("nope.ts", JobStatus::Processing));
        assert!(!queue.update_status_at(10, JobStatus::Processing));
        assert_eq!(queue.stats().pending, 3);
    }

    #[test]
    fn test_status_updates_never_reorder() {
        let mut queue = queue();
        queue.update_status("c.ts", JobStatus::Processing);
        queue.update_status("c.ts", JobStatus::Error);
        queue.update_status("a.ts", JobStatus::Processing);
        queue.update_status("b.ts", JobStatus::Success);

        assert_eq!(queue.get_processing_order(), vec!["a.ts", "b.ts", "c.ts"]);
        let indices: Vec<usize> = queue.get_all().iter().map(|job| job.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(queue.get_by_status(JobStatus::Error)[0].target, "c.ts");
    }

    #[test]
    fn test_stats_and_completion() {
        let mut queue = queue();
        for (target, status) in [
            ("a.ts", JobStatus::Success),
            ("b.ts", JobStatus::Warning),
            ("c.ts", JobStatus::Error),
        ] {
            queue.update_status(target, JobStatus::Processing);
            assert!(!queue.is_complete());
            queue.update_status(target, status);
        }

        let stats = queue.stats();
        assert_eq!(
            stats,
            QueueStats {
                total: 3,
                pending: 0,
                processing: 0,
                success: 1,
                warning: 1,
                error: 1,
            }
        );
        assert!(queue.is_complete());
        assert!(queue.next().is_none());
    }

    #[test]
    fn test_reset_clears_state() {
        let mut queue = queue();
        queue.update_status("a.ts", JobStatus::Processing);
        queue.update_status("a.ts", JobStatus::Success);
        queue.reset();

        let job = queue.get("a.ts").unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.started_at.is_none());
        assert!(job.ended_at.is_none());
        assert_eq!(queue.get_processing_order(), vec!["a.ts", "b.ts", "c.ts"]);
    }

    #[test]
    fn test_duplicate_targets_advance_independently() {
        let mut queue = JobQueue::new(vec!["a.ts".to_string(), "a.ts".to_string()]);
        queue.update_status("a.ts", JobStatus::Processing);
        queue.update_status("a.ts", JobStatus::Success);
        assert!(queue.update_status("a.ts", JobStatus::Processing));

        assert_eq!(queue.get_at(0).unwrap().status, JobStatus::Success);
        assert_eq!(queue.get_at(1).unwrap().status, JobStatus::Processing);
    }

    #[test]
    fn test_status_serializes_screaming_case() {
        assert_eq!(serde_json::to_string(&JobStatus::Warning).unwrap(), "\"WARNING\"");
    }
}

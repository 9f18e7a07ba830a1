//! Processing mode selection.
//!
//! A pure decision from a batch descriptor and caller overrides to either
//! sequential or parallel execution.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// What a batch was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchKind {
    Files,
    Directory,
    Changes,
    Pr,
    /// Any kind this crate does not know about.
    #[serde(other)]
    Unknown,
}

impl BatchKind {
    /// Parses a kind name case-insensitively; anything unrecognized is
    /// [`BatchKind::Unknown`].
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "files" | "file" => BatchKind::Files,
            "directory" | "dir" => BatchKind::Directory,
            "changes" => BatchKind::Changes,
            "pr" | "pull-request" | "pull_request" => BatchKind::Pr,
            _ => BatchKind::Unknown,
        }
    }
}

impl fmt::Display for BatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BatchKind::Files => "FILES",
            BatchKind::Directory => "DIRECTORY",
            BatchKind::Changes => "CHANGES",
            BatchKind::Pr => "PR",
            BatchKind::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

/// A batch of targets submitted together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchDescriptor {
    pub kind: BatchKind,
    pub targets: Vec<String>,
    /// Free-form options passed through to processors untouched.
    #[serde(default)]
    pub options: HashMap<String, String>,
}

impl BatchDescriptor {
    pub fn new<I, S>(kind: BatchKind, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind,
            targets: targets.into_iter().map(Into::into).collect(),
            options: HashMap::new(),
        }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}

/// Caller overrides. `force_sequential` wins when both are set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeOverrides {
    pub force_sequential: bool,
    pub force_parallel: bool,
}

/// How a batch is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingMode {
    Sequential,
    Parallel,
}

impl fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessingMode::Sequential => f.write_str("SEQUENTIAL"),
            ProcessingMode::Parallel => f.write_str("PARALLEL"),
        }
    }
}

/// A mode together with the rule that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModeDecision {
    pub mode: ProcessingMode,
    pub reason: &'static str,
}

/// Chooses a [`ProcessingMode`] for a batch.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessingModeSelector;

impl ProcessingModeSelector {
    pub fn new() -> Self {
        Self
    }

    /// Mode for a batch with no overrides.
    pub fn determine_mode(&self, batch: &BatchDescriptor) -> ProcessingMode {
        self.explain(batch, ModeOverrides::default()).mode
    }

    /// Mode for a batch with overrides.
    ///
    /// `target_count` does not change the outcome: FILES batches run
    /// sequentially at every size. It is recorded in the debug event.
    pub fn determine_mode_advanced(
        &self,
        batch: &BatchDescriptor,
        target_count: usize,
        overrides: ModeOverrides,
    ) -> ProcessingMode {
        let decision = self.explain(batch, overrides);
        tracing::debug!(
            kind = %batch.kind,
            target_count,
            mode = %decision.mode,
            reason = decision.reason,
            "selected processing mode"
        );
        decision.mode
    }

    /// The mode and the rule that chose it, in priority order.
    pub fn explain(&self, batch: &BatchDescriptor, overrides: ModeOverrides) -> ModeDecision {
        let (mode, reason) = if overrides.force_sequential {
            (ProcessingMode::Sequential, "forced sequential")
        } else if overrides.force_parallel {
            (ProcessingMode::Parallel, "forced parallel")
        } else {
            match batch.kind {
                BatchKind::Files | BatchKind::Directory | BatchKind::Changes => {
                    (ProcessingMode::Sequential, "local batches run in order")
                }
                BatchKind::Pr => (ProcessingMode::Parallel, "pull request batches fan out"),
                BatchKind::Unknown => (ProcessingMode::Sequential, "unknown batch kind"),
            }
        };
        ModeDecision { mode, reason }
    }
}

//! Error taxonomy for review jobs.
//!
//! Every failure that leaves this crate is a [`ReviewError`] tagged with one
//! [`ErrorKind`] from a closed set. Retryability and the user-facing guidance
//! string are fixed per kind.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The closed set of failure kinds a review job can end with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// The working directory is not inside a recognizable repository.
    RepositoryNotDetected,
    /// Credentials were rejected (HTTP 401).
    AuthenticationFailed,
    /// Credentials are valid but lack access (HTTP 403).
    PermissionDenied,
    /// The target file or resource does not exist.
    FileNotFound,
    /// Configuration is missing or malformed.
    InvalidConfiguration,
    /// The remote API is throttling requests (HTTP 429).
    ApiRateLimited,
    /// Connectivity problem between us and a remote service.
    NetworkError,
    /// The remote service is temporarily down (HTTP 502/503/504).
    ServiceUnavailable,
    /// An operation exceeded its time limit.
    TimeoutError,
    /// A git command or repository operation failed.
    GitOperationFailed,
    /// Publishing a review comment failed.
    CommentPostFailed,
    /// The language model provider returned an error.
    LlmProviderError,
    /// Catch-all for analysis failures that match nothing more specific.
    AnalysisFailed,
}

impl ErrorKind {
    /// All kinds, in declaration order.
    pub const ALL: [ErrorKind; 13] = [
        ErrorKind::RepositoryNotDetected,
        ErrorKind::AuthenticationFailed,
        ErrorKind::PermissionDenied,
        ErrorKind::FileNotFound,
        ErrorKind::InvalidConfiguration,
        ErrorKind::ApiRateLimited,
        ErrorKind::NetworkError,
        ErrorKind::ServiceUnavailable,
        ErrorKind::TimeoutError,
        ErrorKind::GitOperationFailed,
        ErrorKind::CommentPostFailed,
        ErrorKind::LlmProviderError,
        ErrorKind::AnalysisFailed,
    ];

    /// The canonical SCREAMING_SNAKE_CASE name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::RepositoryNotDetected => "REPOSITORY_NOT_DETECTED",
            ErrorKind::AuthenticationFailed => "AUTHENTICATION_FAILED",
            ErrorKind::PermissionDenied => "PERMISSION_DENIED",
            ErrorKind::FileNotFound => "FILE_NOT_FOUND",
            ErrorKind::InvalidConfiguration => "INVALID_CONFIGURATION",
            ErrorKind::ApiRateLimited => "API_RATE_LIMITED",
            ErrorKind::NetworkError => "NETWORK_ERROR",
            ErrorKind::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorKind::TimeoutError => "TIMEOUT_ERROR",
            ErrorKind::GitOperationFailed => "GIT_OPERATION_FAILED",
            ErrorKind::CommentPostFailed => "COMMENT_POST_FAILED",
            ErrorKind::LlmProviderError => "LLM_PROVIDER_ERROR",
            ErrorKind::AnalysisFailed => "ANALYSIS_FAILED",
        }
    }

    /// Whether failures of this kind may succeed when attempted again.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ErrorKind::RepositoryNotDetected
                | ErrorKind::AuthenticationFailed
                | ErrorKind::PermissionDenied
                | ErrorKind::FileNotFound
                | ErrorKind::InvalidConfiguration
        )
    }

    /// Fixed remediation hint shown to users alongside the raw message.
    pub fn guidance(&self) -> &'static str {
        match self {
            ErrorKind::RepositoryNotDetected => {
                "Run the command from inside a git repository or pass the project path explicitly."
            }
            ErrorKind::AuthenticationFailed => {
                "Check that your access token is set and has not expired."
            }
            ErrorKind::PermissionDenied => {
                "Your token is valid but lacks access; request the required scopes or project role."
            }
            ErrorKind::FileNotFound => "Verify the path exists and is spelled correctly.",
            ErrorKind::InvalidConfiguration => {
                "Review your configuration file and environment overrides for missing or invalid values."
            }
            ErrorKind::ApiRateLimited => {
                "The API is throttling requests; wait a moment or reduce concurrency."
            }
            ErrorKind::NetworkError => "Check your network connection and proxy settings.",
            ErrorKind::ServiceUnavailable => {
                "The remote service is temporarily unavailable; try again shortly."
            }
            ErrorKind::TimeoutError => {
                "The operation took too long; retry or review a smaller change set."
            }
            ErrorKind::GitOperationFailed => {
                "Make sure git is installed and the repository is in a clean, readable state."
            }
            ErrorKind::CommentPostFailed => {
                "The review was produced but could not be published; retry posting the comment."
            }
            ErrorKind::LlmProviderError => {
                "The model provider returned an error; check provider status and model settings."
            }
            ErrorKind::AnalysisFailed => {
                "Analysis failed; rerun with -v for details or review the file manually."
            }
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown kind name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown error kind: {0}")]
pub struct UnknownErrorKind(pub String);

impl FromStr for ErrorKind {
    type Err = UnknownErrorKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        ErrorKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| UnknownErrorKind(s.to_string()))
    }
}

/// Where a failure happened, attached to the classified error's details.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ErrorContext {
    operation: String,
    fields: BTreeMap<String, String>,
}

impl ErrorContext {
    /// Creates a context for the named operation.
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Adds a key-value pair.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// The operation name.
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Extra key-value pairs.
    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }
}

/// A classified failure.
#[derive(Clone, Debug, PartialEq, Error, Serialize)]
#[error("{message}")]
pub struct ReviewError {
    /// The failure kind.
    pub kind: ErrorKind,
    /// The raw failure message.
    pub message: String,
    /// Additional context as key-value pairs.
    pub details: HashMap<String, String>,
    /// Whether retrying may help.
    pub retryable: bool,
    /// When the failure was observed.
    pub occurred_at: DateTime<Utc>,
    /// Remediation hint for users.
    pub guidance: Option<String>,
}

impl ReviewError {
    /// Creates an error of the given kind with the kind's default retryability
    /// and guidance.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: HashMap::new(),
            retryable: kind.is_retryable(),
            occurred_at: Utc::now(),
            guidance: Some(kind.guidance().to_string()),
        }
    }

    /// Adds a detail key-value pair.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Copies the operation and fields of `context` into the details.
    /// Existing details are kept.
    pub fn with_context(mut self, context: &ErrorContext) -> Self {
        if !context.operation().is_empty() {
            self.details
                .entry("operation".to_string())
                .or_insert_with(|| context.operation().to_string());
        }
        for (key, value) in context.fields() {
            self.details
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        self
    }

    /// Returns true if retrying may help.
    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    /// The message shown to users: the raw message followed by guidance.
    pub fn user_message(&self) -> String {
        match &self.guidance {
            Some(guidance) => format!("{}\n{}", self.message, guidance),
            None => self.message.clone(),
        }
    }
}

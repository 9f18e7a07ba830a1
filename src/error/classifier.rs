//! Failure classifier.
//!
//! All message heuristics live here: raw failures are matched against an
//! ordered list of case-insensitive patterns and mapped onto an
//! [`ErrorKind`]. The first matching pattern wins, so ordering encodes
//! priority (e.g. "connection timed out" is a network error, not a timeout).

use std::error::Error as StdError;

use regex::Regex;

use super::{ErrorContext, ErrorKind, ReviewError};

/// A pattern for matching failure messages.
#[derive(Debug)]
pub struct ErrorPattern {
    regex: Regex,
    kind: ErrorKind,
    description: String,
}

impl ErrorPattern {
    /// Creates a new error pattern.
    ///
    /// # Panics
    /// Panics if the regex pattern is invalid.
    pub fn new(pattern: &str, kind: ErrorKind, description: impl Into<String>) -> Self {
        Self {
            regex: Regex::new(pattern).expect("Invalid regex pattern"),
            kind,
            description: description.into(),
        }
    }

    /// Creates a new error pattern with a pre-compiled regex.
    pub fn with_regex(regex: Regex, kind: ErrorKind, description: impl Into<String>) -> Self {
        Self {
            regex,
            kind,
            description: description.into(),
        }
    }

    /// Returns the kind assigned on match.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Finds the first match in the text.
    pub fn find<'a>(&self, text: &'a str) -> Option<&'a str> {
        self.regex.find(text).map(|m| m.as_str())
    }
}

/// Maps arbitrary failures onto the closed [`ErrorKind`] taxonomy.
#[derive(Debug)]
pub struct ErrorClassifier {
    patterns: Vec<ErrorPattern>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorClassifier {
    /// Creates a classifier with the built-in patterns.
    pub fn new() -> Self {
        Self {
            patterns: Self::default_patterns(),
        }
    }

    /// Creates a classifier with custom patterns, in priority order.
    pub fn with_patterns(patterns: Vec<ErrorPattern>) -> Self {
        Self { patterns }
    }

    fn default_patterns() -> Vec<ErrorPattern> {
        vec![
            ErrorPattern::new(
                r"(?i)network|connection",
                ErrorKind::NetworkError,
                "Network or connection failure",
            ),
            ErrorPattern::new(
                r"(?i)unauthori[sz]ed|\b401\b",
                ErrorKind::AuthenticationFailed,
                "Unauthorized",
            ),
            ErrorPattern::new(
                r"(?i)forbidden|\b403\b|permission\s+denied|access\s+denied",
                ErrorKind::PermissionDenied,
                "Forbidden",
            ),
            ErrorPattern::new(
                r"(?i)rate[\s\-_]?limit|\b429\b|too\s+many\s+requests",
                ErrorKind::ApiRateLimited,
                "Rate limited",
            ),
            ErrorPattern::new(
                r"(?i)not\s+found|\b404\b|enoent|no\s+such\s+file",
                ErrorKind::FileNotFound,
                "Not found",
            ),
            ErrorPattern::new(
                r"(?i)time[\s\-]?out|timed\s+out",
                ErrorKind::TimeoutError,
                "Timeout",
            ),
            ErrorPattern::new(
                r"(?i)\b50[234]\b|service\s+unavailable|bad\s+gateway",
                ErrorKind::ServiceUnavailable,
                "Service unavailable",
            ),
            ErrorPattern::new(
                r"(?i)\bgit\b|repository",
                ErrorKind::GitOperationFailed,
                "Git operation failed",
            ),
        ]
    }

    /// Adds a pattern at the lowest priority.
    pub fn add_pattern(&mut self, pattern: ErrorPattern) {
        self.patterns.push(pattern);
    }

    /// Returns the configured patterns in priority order.
    pub fn patterns(&self) -> &[ErrorPattern] {
        &self.patterns
    }

    /// Returns the kind a message maps to; `AnalysisFailed` if nothing matches.
    pub fn kind_for_message(&self, message: &str) -> ErrorKind {
        self.match_message(message)
            .map(|(pattern, _)| pattern.kind)
            .unwrap_or(ErrorKind::AnalysisFailed)
    }

    fn match_message<'p, 't>(&'p self, message: &'t str) -> Option<(&'p ErrorPattern, &'t str)> {
        self.patterns
            .iter()
            .find_map(|pattern| pattern.find(message).map(|matched| (pattern, matched)))
    }

    /// Classifies a failure message.
    pub fn classify_message(&self, message: &str, context: &ErrorContext) -> ReviewError {
        let error = match self.match_message(message) {
            Some((pattern, matched)) => ReviewError::new(pattern.kind, message)
                .with_detail("matched_pattern", matched),
            None => ReviewError::new(ErrorKind::AnalysisFailed, message),
        };
        error
            .with_detail("original_message", message)
            .with_context(context)
    }

    /// Classifies a failure.
    ///
    /// A [`ReviewError`] passes through unchanged. Anything else is
    /// classified by its message, including the messages of its source chain.
    pub fn classify(&self, error: &(dyn StdError + 'static), context: &ErrorContext) -> ReviewError {
        if let Some(review_error) = error.downcast_ref::<ReviewError>() {
            return review_error.clone();
        }

        let mut message = error.to_string();
        let mut source = error.source();
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        self.classify_message(&message, context)
    }
}

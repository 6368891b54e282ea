//! Per-item and per-component outcome records.

use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// Category of an [`Outcome`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeKind {
    /// The unit of work completed.
    Success,
    /// The unit of work failed. Counts against the run's exit status.
    Failure,
    /// The item was intentionally dropped by policy (duplicate, filtered,
    /// collision removed). Not a failure.
    Skipped,
    /// Work stopped because cancellation was requested. Not a failure.
    Cancelled,
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeKind::Success => write!(f, "Success"),
            OutcomeKind::Failure => write!(f, "Failure"),
            OutcomeKind::Skipped => write!(f, "Skipped"),
            OutcomeKind::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Result of one attempted operation (read, transform, write).
#[derive(Debug, Clone)]
pub struct Outcome {
    kind: OutcomeKind,
    message: String,
    cause: Option<Arc<dyn Error + Send + Sync>>,
}

impl Outcome {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            kind: OutcomeKind::Success,
            message: message.into(),
            cause: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            kind: OutcomeKind::Failure,
            message: message.into(),
            cause: None,
        }
    }

    /// A failure with the underlying error attached.
    pub fn error(message: impl Into<String>, cause: impl Error + Send + Sync + 'static) -> Self {
        Self {
            kind: OutcomeKind::Failure,
            message: message.into(),
            cause: Some(Arc::new(cause)),
        }
    }

    pub fn skipped(message: impl Into<String>) -> Self {
        Self {
            kind: OutcomeKind::Skipped,
            message: message.into(),
            cause: None,
        }
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self {
            kind: OutcomeKind::Cancelled,
            message: message.into(),
            cause: None,
        }
    }

    pub fn kind(&self) -> OutcomeKind {
        self.kind
    }

    /// `true` for successes and benign outcomes (skips, cancellation).
    pub fn succeeded(&self) -> bool {
        self.kind != OutcomeKind::Failure
    }

    pub fn is_failure(&self) -> bool {
        self.kind == OutcomeKind::Failure
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn cause(&self) -> Option<&(dyn Error + Send + Sync + 'static)> {
        self.cause.as_deref()
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(cause) = &self.cause {
            write!(f, " ({cause})")?;
        }
        Ok(())
    }
}

//! Error classification for storage, resolver and batch failures.
//!
//! Errors travel as `anyhow::Error` chains. A [`ForumError`] attached to the chain (either as the
//! root or as context) carries the [`ErrorKind`] which callers inspect via [`kind_of`]. Use
//! [`ResultExt`] to classify an existing error chain or [`forum_bail!`] for early returns.

use std::fmt::{Debug, Display, Formatter};

/// The failure taxonomy of the data access layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A referenced entity does not exist.
    NotFound,
    /// Malformed input which the caller should have prevented.
    Validation,
    /// An optimistic precondition lost against the current item state.
    ConditionFailed,
    /// The store could not be reached or failed internally.
    StoreUnavailable,
    /// The store rejected the request due to rate limits.
    Throttled,
    /// A batch where some items failed while the rest already committed.
    PartialFailure,
}

impl ErrorKind {
    /// Transient infrastructure faults are worth another attempt, business signals are not.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::StoreUnavailable | ErrorKind::Throttled)
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::NotFound => "not found",
            ErrorKind::Validation => "validation error",
            ErrorKind::ConditionFailed => "condition failed",
            ErrorKind::StoreUnavailable => "store unavailable",
            ErrorKind::Throttled => "throttled",
            ErrorKind::PartialFailure => "partial failure",
        };

        write!(f, "{}", name)
    }
}

/// A classified error with a human-readable message.
#[derive(Clone, Debug)]
pub struct ForumError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ForumError {
    pub fn new(kind: ErrorKind, message: impl ToString) -> Self {
        ForumError {
            kind,
            message: message.to_string(),
        }
    }
}

impl Display for ForumError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ForumError {}

/// Returns the kind of the outermost [`ForumError`] within the given chain.
pub fn kind_of(err: &anyhow::Error) -> Option<ErrorKind> {
    err.downcast_ref::<ForumError>().map(|err| err.kind)
}

/// Determines if the given error carries the given kind.
pub fn is_kind(err: &anyhow::Error, kind: ErrorKind) -> bool {
    kind_of(err) == Some(kind)
}

/// Extension trait for classifying error results.
pub trait ResultExt<T> {
    /// Wraps the error with a [`ForumError`] of the given kind.
    fn with_kind(self, kind: ErrorKind) -> anyhow::Result<T>;

    /// Convenience method for `with_kind(ErrorKind::Validation)`.
    fn mark_invalid(self) -> anyhow::Result<T>;
}

impl<T> ResultExt<T> for anyhow::Result<T> {
    fn with_kind(self, kind: ErrorKind) -> anyhow::Result<T> {
        match self {
            Ok(t) => Ok(t),
            Err(err) => {
                let message = format!("{:#}", err);
                Err(err.context(ForumError { kind, message }))
            }
        }
    }

    fn mark_invalid(self) -> anyhow::Result<T> {
        self.with_kind(ErrorKind::Validation)
    }
}

/// Early return with a classified error.
#[macro_export]
macro_rules! forum_bail {
    ($kind:expr, $msg:literal $(,)?) => {
        return Err(::anyhow::Error::new($crate::error::ForumError::new($kind, format!($msg))))
    };
    ($kind:expr, $fmt:literal, $($arg:tt)*) => {
        return Err(::anyhow::Error::new($crate::error::ForumError::new($kind, format!($fmt, $($arg)*))))
    };
}

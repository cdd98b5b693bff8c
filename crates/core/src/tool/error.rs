use std::borrow::Cow;
use std::error::Error as StdError;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

/// The kind of error that occurred.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The tool server did not answer in time.
    Timeout,
    /// The tool server could not be reached.
    Unreachable,
    /// The arguments do not match the tool's parameter schema.
    InvalidArguments,
    /// The tool server reported an application error.
    ToolError,
}

impl ErrorKind {
    /// Returns `true` if calling again with the same arguments may succeed.
    #[inline]
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Timeout | ErrorKind::Unreachable)
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Timeout => write!(f, "Timeout"),
            ErrorKind::Unreachable => write!(f, "Unreachable"),
            ErrorKind::InvalidArguments => write!(f, "Invalid arguments"),
            ErrorKind::ToolError => write!(f, "Tool error"),
        }
    }
}

/// Describes a tool call failure.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Error {
    kind: ErrorKind,
    reason: Option<String>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[inline]
    pub fn new(kind: ErrorKind) -> Self {
        Self { kind, reason: None }
    }

    /// Creates a new error with the `Timeout` kind.
    #[inline]
    pub fn timeout() -> Self {
        Self::new(ErrorKind::Timeout)
    }

    /// Creates a new error with the `Unreachable` kind.
    #[inline]
    pub fn unreachable() -> Self {
        Self::new(ErrorKind::Unreachable)
    }

    /// Creates a new error with the `InvalidArguments` kind.
    #[inline]
    pub fn invalid_arguments() -> Self {
        Self::new(ErrorKind::InvalidArguments)
    }

    /// Creates a new error with the `ToolError` kind.
    #[inline]
    pub fn tool_error() -> Self {
        Self::new(ErrorKind::ToolError)
    }

    /// Attaches a reason to the error.
    #[inline]
    pub fn with_reason<S: Into<String>>(self, reason: S) -> Self {
        Self {
            kind: self.kind,
            reason: Some(reason.into()),
        }
    }

    /// Returns the kind of the error.
    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the reason for the error.
    #[inline]
    pub fn reason(&self) -> Cow<'_, str> {
        match self.reason.as_deref() {
            Some(reason) => Cow::Borrowed(reason),
            None => Cow::Owned(format!("{}", self.kind)),
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            Some(reason) => write!(f, "{}: {}", self.kind, reason),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl StdError for Error {}

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

/// The kind of error that occurred while calling a model.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The provider did not answer in time.
    Timeout,
    /// The model provider is rate limited.
    RateLimited,
    /// Any other error reported by the provider.
    ProviderError,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Timeout => write!(f, "Timeout"),
            ErrorKind::RateLimited => write!(f, "Rate limited"),
            ErrorKind::ProviderError => write!(f, "Provider error"),
        }
    }
}

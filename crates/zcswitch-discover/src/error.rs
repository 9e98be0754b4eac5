//! Error types for the discover crate.

use thiserror::Error;

/// Errors that can occur during discovery operations.
#[derive(Debug, Error)]
pub enum DiscoverError {
    /// An argument failed validation. Raised before any network activity.
    #[error("invalid argument `{name}`: {reason}")]
    InvalidArgument {
        /// Name of the offending argument.
        name: &'static str,
        /// What was wrong with it.
        reason: String,
    },

    /// The selected backend cannot honour the request.
    #[error("not supported by this backend: {0}")]
    Unsupported(String),

    /// The operation was cancelled through its cancellation token.
    #[error("discovery operation cancelled")]
    Cancelled,

    /// Error from the mdns-sd daemon.
    #[error("mDNS daemon error: {0}")]
    Daemon(String),

    /// Error from the native zeroconf library.
    #[cfg(feature = "native")]
    #[error("mDNS error: {0}")]
    Zeroconf(#[from] zeroconf::error::Error),

    /// Error creating or interpreting service info.
    #[error("Service info error: {0}")]
    ServiceInfo(String),

    /// The background listener could not be started.
    #[error("listener error: {0}")]
    Listener(String),
}

impl DiscoverError {
    /// Create an invalid argument error.
    pub fn invalid_argument(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name,
            reason: reason.into(),
        }
    }

    /// Whether this error is a validation failure.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument { .. })
    }

    /// Whether this error reports a cancelled operation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<mdns_sd::Error> for DiscoverError {
    fn from(err: mdns_sd::Error) -> Self {
        Self::Daemon(err.to_string())
    }
}

//! Error taxonomy for the asset registry
//!
//! Only [`AssetError::InvalidKey`] and [`AssetError::BackendFault`] are ever
//! returned as `Err` from registry calls, and only under
//! [`ExceptionPolicy::Throw`]. Every other condition is delivered to a
//! failure continuation or reported as `None` plus a log line.

use serde::{Deserialize, Serialize};

use super::backend::BackendError;

/// Errors produced by the asset registry and its cache tables.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AssetError {
    /// The key was empty or absent
    #[error("asset key must be a non-empty string")]
    InvalidKey,

    /// Nothing is cached under this key
    #[error("no asset with key `{key}` has been loaded")]
    NotFound {
        /// Requested key
        key: String,
    },

    /// The cached value exists but has a different type than requested
    #[error("asset with key `{key}` is a `{found}`, not a `{expected}`")]
    TypeMismatch {
        /// Requested key
        key: String,
        /// Type the caller asked for
        expected: &'static str,
        /// Type actually stored
        found: &'static str,
    },

    /// The key is already bound to a value of an incompatible type
    #[error("asset key `{key}` is already bound to a `{existing}`, cannot bind a `{incoming}`")]
    Collision {
        /// Contested key
        key: String,
        /// Type of the value already cached
        existing: &'static str,
        /// Type of the value that was rejected
        incoming: &'static str,
    },

    /// The backend operation ended in a failed state or produced no payload
    #[error("backend could not resolve `{key}`: {reason}")]
    BackendFailure {
        /// Requested key
        key: String,
        /// Backend supplied reason
        reason: String,
    },

    /// The backend refused the request while it was being issued
    #[error("backend fault while issuing `{key}`: {source}")]
    BackendFault {
        /// Requested key
        key: String,
        /// Underlying backend error
        source: BackendError,
    },

    /// A release targeted a key or instance that is not tracked
    #[error("no tracked instance for key `{key}`")]
    UntrackedRelease {
        /// Requested key
        key: String,
    },
}

impl AssetError {
    /// Build a [`AssetError::BackendFailure`]
    pub fn backend_failure(key: &str, reason: impl Into<String>) -> Self {
        Self::BackendFailure {
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    /// Key the error refers to, empty for [`AssetError::InvalidKey`]
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::InvalidKey => "",
            Self::NotFound { key }
            | Self::TypeMismatch { key, .. }
            | Self::Collision { key, .. }
            | Self::BackendFailure { key, .. }
            | Self::BackendFault { key, .. }
            | Self::UntrackedRelease { key } => key,
        }
    }
}

/// How synchronous faults are surfaced to the caller.
///
/// The registry reads the live value at the moment the fault happens, so a
/// policy change takes effect on the very next call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExceptionPolicy {
    /// Log the error and carry on
    #[default]
    Log,
    /// Hand the error back to the caller as `Err`
    Throw,
    /// Swallow the error without a trace
    Suppress,
}

impl ExceptionPolicy {
    /// Apply the policy to `error`.
    ///
    /// # Errors
    ///
    /// Returns `error` unchanged under [`ExceptionPolicy::Throw`].
    pub fn raise(self, error: AssetError) -> Result<(), AssetError> {
        match self {
            Self::Throw => Err(error),
            Self::Log => {
                log::error!("{error}");
                Ok(())
            }
            Self::Suppress => Ok(()),
        }
    }
}

use thiserror::Error;

/// Convenience alias for `Result<T, BeaconError>`.
pub type BeaconResult<T> = Result<T, BeaconError>;

/// Error classification for routing/retry decisions.
///
/// - `Validation`       — bad input, rejected before any side effect
/// - `NotFound`         — a referenced query does not exist
/// - `PermissionDenied` — an ACL rejection
/// - `Conflict`         — a uniqueness constraint would be violated
/// - `UnavailableDc`    — the target datacenter is unknown or unreachable
/// - `Internal`         — log-apply or catalog errors, surfaced verbatim
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    PermissionDenied,
    Conflict,
    UnavailableDc,
    Internal,
}

/// Top-level error type that all crate-specific errors convert into.
#[derive(Error, Debug)]
pub enum BeaconError {
    #[error("{0}")]
    Validation(String),

    /// A prepared query could not be resolved by ID or name.
    #[error("Query not found")]
    QueryNotFound,

    #[error("Permission denied")]
    PermissionDenied,

    #[error("{0}")]
    Conflict(String),

    /// The target datacenter is unknown to the member pool, or every member
    /// of it is unreachable.
    #[error("Remote DC has no available servers: {0}")]
    UnavailableDc(String),

    /// No leader is known for the local datacenter.
    #[error("No cluster leader")]
    NoLeader,

    #[error("{0}")]
    Internal(String),
}

impl BeaconError {
    /// Classify this error for routing/retry decisions.
    pub fn kind(&self) -> ErrorKind {
        match self {
            BeaconError::Validation(_) => ErrorKind::Validation,
            BeaconError::QueryNotFound => ErrorKind::NotFound,
            BeaconError::PermissionDenied => ErrorKind::PermissionDenied,
            BeaconError::Conflict(_) => ErrorKind::Conflict,
            BeaconError::UnavailableDc(_) => ErrorKind::UnavailableDc,
            BeaconError::NoLeader => ErrorKind::Internal,
            BeaconError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Returns true if this is an input error (rejected before side effects).
    pub fn is_validation(&self) -> bool {
        matches!(self.kind(), ErrorKind::Validation)
    }

    /// Returns true if this is an ACL rejection.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self.kind(), ErrorKind::PermissionDenied)
    }

    /// Returns true if the error names an unknown/unreachable datacenter.
    /// The failover traversal absorbs these and moves to the next target.
    pub fn is_unavailable_dc(&self) -> bool {
        matches!(self.kind(), ErrorKind::UnavailableDc)
    }

    /// Construct a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        BeaconError::Validation(msg.into())
    }

    /// Construct a conflict error.
    pub fn conflict(msg: impl Into<String>) -> Self {
        BeaconError::Conflict(msg.into())
    }

    /// Construct an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        BeaconError::Internal(msg.into())
    }

    /// Add context to the message, preserving the error classification.
    pub fn with_context(self, ctx: impl Into<String>) -> Self {
        let ctx = ctx.into();
        match self {
            BeaconError::Validation(msg) => BeaconError::Validation(format!("{ctx}: {msg}")),
            BeaconError::Conflict(msg) => BeaconError::Conflict(format!("{ctx}: {msg}")),
            BeaconError::Internal(msg) => BeaconError::Internal(format!("{ctx}: {msg}")),
            other => other,
        }
    }
}

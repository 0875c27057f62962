//! Error types for the NamespaceStore Operator
//!
//! Every failure surfaced during reconciliation is classified as either
//! [`ErrorKind::Persistent`] (the record will never converge without an edit) or
//! [`ErrorKind::Transient`] (expected to self-resolve on retry).

use std::time::Duration;
use thiserror::Error;

/// RPC code returned by the remote API when a dependent is still attached
pub const RPC_CODE_IN_USE: &str = "IN_USE";

/// RPC code returned by the remote API for structurally invalid parameters
pub const RPC_CODE_INVALID_SCHEMA_PARAMS: &str = "INVALID_SCHEMA_PARAMS";

/// Unified error type for the operator
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Record Store Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    #[error("Resource already exists: {kind}/{name}")]
    ResourceExists { kind: String, name: String },

    #[error("Update conflict on {kind}/{name}: {reason}")]
    Conflict {
        kind: String,
        name: String,
        reason: String,
    },

    // =========================================================================
    // Remote Storage API Errors
    // =========================================================================
    #[error("Remote API transport error: {0}")]
    RemoteTransport(#[from] reqwest::Error),

    #[error("Remote API {method} failed with {code}: {message}")]
    Rpc {
        method: String,
        code: String,
        message: String,
    },

    #[error("{0}")]
    Remote(String),

    #[error("Namespace resource {name:?} cannot be deleted while buckets are attached")]
    ResourceInUse { name: String },

    // =========================================================================
    // Classified Errors
    // =========================================================================
    #[error("{message}")]
    Persistent { reason: String, message: String },

    #[error("{0}")]
    Transient(String),

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
}

/// Classification of an error for the reconcile loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Terminal until the record is edited
    Persistent,
    /// Retry later
    Transient,
}

/// Action to take on error during reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Requeue after specific duration
    RequeueAfter(Duration),
    /// Don't requeue, wait for changes
    NoRequeue,
}

impl Error {
    /// Create a persistent error with a stable reason code
    pub fn persistent(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Persistent {
            reason: reason.into(),
            message: message.into(),
        }
    }

    /// Create a transient error
    pub fn transient(message: impl Into<String>) -> Self {
        Error::Transient(message.into())
    }

    /// Classify this error. Anything not explicitly persistent is transient.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Persistent { .. } => ErrorKind::Persistent,
            _ => ErrorKind::Transient,
        }
    }

    /// Check if this error is persistent
    pub fn is_persistent(&self) -> bool {
        self.kind() == ErrorKind::Persistent
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// Determine what action to take for this error
    pub fn action(&self, requeue_after: Duration) -> ErrorAction {
        match self.kind() {
            ErrorKind::Persistent => ErrorAction::NoRequeue,
            ErrorKind::Transient => ErrorAction::RequeueAfter(requeue_after),
        }
    }

    /// Reason code carried by a persistent error
    pub fn reason(&self) -> Option<&str> {
        match self {
            Error::Persistent { reason, .. } => Some(reason),
            _ => None,
        }
    }

    /// RPC code carried by a remote API error
    pub fn rpc_code(&self) -> Option<&str> {
        match self {
            Error::Rpc { code, .. } => Some(code),
            _ => None,
        }
    }

    /// Check if this is an optimistic-concurrency conflict
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::Conflict { .. } => true,
            Error::Kube(kube::Error::Api(resp)) => resp.code == 409,
            _ => false,
        }
    }

    /// Check if this is a not-found error
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::ResourceNotFound { .. } => true,
            Error::Kube(kube::Error::Api(resp)) => resp.code == 404,
            _ => false,
        }
    }
}

/// Combine several errors into one.
///
/// Returns the first error, unless a later one is persistent while the
/// current pick is not.
pub fn combine_errors<I>(errors: I) -> Option<Error>
where
    I: IntoIterator<Item = Option<Error>>,
{
    let mut combined: Option<Error> = None;
    for err in errors.into_iter().flatten() {
        match &combined {
            None => combined = Some(err),
            Some(current) if err.is_persistent() && !current.is_persistent() => {
                combined = Some(err)
            }
            Some(_) => {}
        }
    }
    combined
}

/// Result type alias for the operator
pub type Result<T> = std::result::Result<T, Error>;

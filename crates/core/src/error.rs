use serde::{Deserialize, Serialize};

/// Errors surfaced by a reconciliation pass and its collaborators.
///
/// Recoverable variants ask the dispatcher for another pass; the rest are
/// fatal for the current pass and are handed back unmodified.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum EchoError {
    #[error("not_found: {0}")]
    NotFound(String),
    #[error("transient: {0}")]
    Transient(String),
    #[error("field_not_found: path {path} does not (yet) resolve")]
    FieldNotFound { path: String },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("malformed_path: {path}: {reason}")]
    MalformedPath { path: String, reason: String },
    #[error("permission_denied: {0}")]
    PermissionDenied(String),
    #[error("schema: {0}")]
    Schema(String),
    #[error("internal: {0}")]
    Internal(String),
}

pub type EchoResult<T> = Result<T, EchoError>;

impl EchoError {
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EchoError::NotFound(_) | EchoError::Transient(_) | EchoError::FieldNotFound { .. } | EchoError::Conflict(_)
        )
    }

    /// Short stable label, used for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            EchoError::NotFound(_) => "not_found",
            EchoError::Transient(_) => "transient",
            EchoError::FieldNotFound { .. } => "field_not_found",
            EchoError::Conflict(_) => "conflict",
            EchoError::MalformedPath { .. } => "malformed_path",
            EchoError::PermissionDenied(_) => "permission_denied",
            EchoError::Schema(_) => "schema",
            EchoError::Internal(_) => "internal",
        }
    }
}

impl From<serde_json::Error> for EchoError {
    fn from(e: serde_json::Error) -> Self {
        EchoError::Internal(format!("json: {}", e))
    }
}

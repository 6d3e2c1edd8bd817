//! Failure taxonomy shared by every caller-facing operation.

use std::collections::BTreeMap;

use serde::Serialize;

/// Field name -> messages, as reported by the backend.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// User-facing copy for an unrecoverable session.
pub const SESSION_EXPIRED_MESSAGE: &str = "Your session has expired. Please sign in again.";

/// A failed call, classified once and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClassifiedError {
    #[error("{message}")]
    AuthExpired { message: String },
    #[error("{message}")]
    PermissionDenied { message: String },
    #[error("{message}")]
    NotFound { message: String },
    #[error("{message}")]
    Validation { fields: FieldErrors, message: String },
    #[error("{message}")]
    Network { message: String },
    #[error("{message}")]
    Unknown { message: String },
}

/// Discriminant of [`ClassifiedError`], handy for assertions and log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    AuthExpired,
    PermissionDenied,
    NotFound,
    Validation,
    Network,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::AuthExpired => "auth_expired",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Validation => "validation",
            ErrorKind::Network => "network",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl ClassifiedError {
    pub fn session_expired() -> Self {
        ClassifiedError::AuthExpired {
            message: SESSION_EXPIRED_MESSAGE.to_string(),
        }
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        ClassifiedError::Unknown {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ClassifiedError::AuthExpired { .. } => ErrorKind::AuthExpired,
            ClassifiedError::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            ClassifiedError::NotFound { .. } => ErrorKind::NotFound,
            ClassifiedError::Validation { .. } => ErrorKind::Validation,
            ClassifiedError::Network { .. } => ErrorKind::Network,
            ClassifiedError::Unknown { .. } => ErrorKind::Unknown,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ClassifiedError::AuthExpired { message }
            | ClassifiedError::PermissionDenied { message }
            | ClassifiedError::NotFound { message }
            | ClassifiedError::Validation { message, .. }
            | ClassifiedError::Network { message }
            | ClassifiedError::Unknown { message } => message,
        }
    }

    pub fn fields(&self) -> Option<&FieldErrors> {
        match self {
            ClassifiedError::Validation { fields, .. } => Some(fields),
            _ => None,
        }
    }

    pub fn is_auth_expired(&self) -> bool {
        matches!(self, ClassifiedError::AuthExpired { .. })
    }
}

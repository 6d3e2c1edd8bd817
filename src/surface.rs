//! Turns classified failures into user-facing notifications.

use std::sync::Arc;

use tracing::{error, warn};

use crate::error::{ClassifiedError, ErrorKind, FieldErrors};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

/// A toast, as handed to the notification system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub kind: ErrorKind,
    pub severity: Severity,
    pub title: String,
    pub message: String,
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Writes notifications to the log. Used by the CLI.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: Notification) {
        match notification.severity {
            Severity::Warning => warn!(kind = notification.kind.as_str(), "{}: {}", notification.title, notification.message),
            Severity::Error => error!(kind = notification.kind.as_str(), "{}: {}", notification.title, notification.message),
        }
    }
}

/// Stateless: reports each failure once, never retries.
#[derive(Clone)]
pub struct ErrorSurface {
    notifier: Arc<dyn Notifier>,
}

impl ErrorSurface {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        ErrorSurface { notifier }
    }

    /// Shows a toast for `error`, except for validation failures whose field
    /// errors are handed back for inline display instead.
    pub fn report(&self, error: &ClassifiedError) -> Option<FieldErrors> {
        let (severity, title, message) = match error {
            ClassifiedError::Validation { fields, .. } => return Some(fields.clone()),
            // the login redirect itself is the renewal coordinator's job
            ClassifiedError::AuthExpired { message } => {
                (Severity::Warning, "Session expired", message.clone())
            }
            ClassifiedError::PermissionDenied { .. } => (
                Severity::Error,
                "Access denied",
                "You do not have permission to perform this action.".to_string(),
            ),
            ClassifiedError::NotFound { .. } => (
                Severity::Warning,
                "Not found",
                "The requested resource could not be found.".to_string(),
            ),
            ClassifiedError::Network { .. } => (
                Severity::Error,
                "Connection problem",
                "Unable to reach the server. Check your connection and try again.".to_string(),
            ),
            ClassifiedError::Unknown { message } => {
                (Severity::Error, "Something went wrong", message.clone())
            }
        };

        self.notifier.notify(Notification {
            kind: error.kind(),
            severity,
            title: title.to_string(),
            message,
        });
        None
    }
}

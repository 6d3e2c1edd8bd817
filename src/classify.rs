//! Maps a failed call onto [`ClassifiedError`]. Pure and total.

use http::StatusCode;
use serde_json::Value;

use crate::error::{ClassifiedError, FieldErrors};
use crate::transport::{RawResponse, TransportError};

/// A failed attempt: either nothing came back, or a non-success status did.
#[derive(Debug, Clone)]
pub enum Failure {
    Transport(TransportError),
    Status(RawResponse),
}

impl Failure {
    /// Splits a transport result into success and failure. Non-2xx is a failure.
    pub fn from_result(result: Result<RawResponse, TransportError>) -> Result<RawResponse, Failure> {
        match result {
            Ok(response) if response.is_success() => Ok(response),
            Ok(response) => Err(Failure::Status(response)),
            Err(e) => Err(Failure::Transport(e)),
        }
    }
}

const VALIDATION_MESSAGE: &str = "Please correct the highlighted fields.";
// keeps HTML error pages and stack traces out of user-facing copy
const MAX_TEXT_MESSAGE_LEN: usize = 200;

pub fn classify(failure: &Failure) -> ClassifiedError {
    let response = match failure {
        Failure::Transport(e) => {
            return ClassifiedError::Network {
                message: format!("Unable to reach the server ({}).", e),
            }
        }
        Failure::Status(response) => response,
    };

    let body = serde_json::from_slice::<Value>(&response.body).ok();
    let message = best_message(response, body.as_ref());

    match response.status {
        StatusCode::UNAUTHORIZED => ClassifiedError::AuthExpired { message },
        StatusCode::FORBIDDEN => ClassifiedError::PermissionDenied { message },
        StatusCode::NOT_FOUND => ClassifiedError::NotFound { message },
        status => match body.as_ref().and_then(field_errors) {
            Some(fields) => ClassifiedError::Validation {
                fields,
                message: validation_message(body.as_ref()),
            },
            None if status == StatusCode::UNPROCESSABLE_ENTITY => ClassifiedError::Validation {
                fields: FieldErrors::new(),
                message,
            },
            None => ClassifiedError::Unknown { message },
        },
    }
}

/// Recognises the field-error payload shapes the backend emits:
/// `{"errors": {field: [msg] | msg}}`, `{"fields": {field: msg}}` and
/// `{"detail": [{"loc": [.., field], "msg": msg}]}`.
fn field_errors(body: &Value) -> Option<FieldErrors> {
    let mut fields = FieldErrors::new();

    for key in ["errors", "fields"] {
        if let Some(Value::Object(map)) = body.get(key) {
            for (field, messages) in map {
                let collected: Vec<String> = match messages {
                    Value::String(s) => vec![s.clone()],
                    Value::Array(items) => items.iter().filter_map(message_of).collect(),
                    _ => continue,
                };
                if !collected.is_empty() {
                    fields.entry(field.clone()).or_default().extend(collected);
                }
            }
        }
    }

    if let Some(Value::Array(issues)) = body.get("detail") {
        for issue in issues {
            let field = issue
                .get("loc")
                .and_then(Value::as_array)
                .and_then(|loc| loc.last())
                .and_then(|last| match last {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                });
            let msg = issue.get("msg").and_then(Value::as_str);
            if let (Some(field), Some(msg)) = (field, msg) {
                fields.entry(field).or_default().push(msg.to_string());
            }
        }
    }

    if fields.is_empty() {
        None
    } else {
        Some(fields)
    }
}

fn message_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(_) => value
            .get("message")
            .or_else(|| value.get("msg"))
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

fn validation_message(body: Option<&Value>) -> String {
    body.and_then(|b| b.get("message"))
        .and_then(Value::as_str)
        .unwrap_or(VALIDATION_MESSAGE)
        .to_string()
}

fn best_message(response: &RawResponse, body: Option<&Value>) -> String {
    if let Some(body) = body {
        for key in ["detail", "message", "error"] {
            if let Some(Value::String(s)) = body.get(key) {
                if !s.trim().is_empty() {
                    return s.clone();
                }
            }
        }
        if let Some(Value::String(s)) = body.get("error").and_then(|e| e.get("message")) {
            return s.clone();
        }
    } else {
        let text = response.text();
        let text = text.trim();
        if !text.is_empty() && text.len() <= MAX_TEXT_MESSAGE_LEN && !text.starts_with('<') {
            return text.to_string();
        }
    }

    match response.status.canonical_reason() {
        Some(reason) => reason.to_string(),
        None => format!("Request failed with status {}", response.status.as_u16()),
    }
}

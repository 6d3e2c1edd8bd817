//! Library exports for bearer-relay, shared between the binary and tests.

pub mod classify;
pub mod client;
pub mod config;
pub mod credential;
pub mod dispatcher;
pub mod error;
pub mod navigation;
pub mod renewal;
pub mod request;
pub mod session;
pub mod surface;
pub mod teardown;
pub mod transport;
pub mod utils;

pub use client::{ApiClient, Download};
pub use error::{ClassifiedError, ErrorKind, FieldErrors};
pub use request::{MultipartPart, PendingRequest};
pub use session::{AuthState, Session, SessionParts, UserProfile};

use std::sync::Arc;

use http::header::AUTHORIZATION;
use http::{HeaderMap, HeaderValue};
use tracing::{debug, warn};

use crate::credential::CredentialStore;
use crate::request::PendingRequest;
use crate::transport::{RawResponse, Transport, TransportError};

/// Result of one dispatch: the raw transport result plus the credential that
/// was attached, so a later 401 can be matched against the credential that
/// caused it.
#[derive(Debug)]
pub struct Dispatched {
    pub result: Result<RawResponse, TransportError>,
    pub sent_with: Option<String>,
}

/// Attaches the current credential and hands the request to the transport.
///
/// It never interprets the outcome; classification is a separate step.
#[derive(Clone)]
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    credentials: Arc<CredentialStore>,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn Transport>, credentials: Arc<CredentialStore>) -> Self {
        Dispatcher {
            transport,
            credentials,
        }
    }

    pub async fn send(&self, request: &PendingRequest) -> Dispatched {
        let sent_with = self.credentials.get();
        let mut headers = request.headers.clone();

        if let Some(token) = &sent_with {
            match HeaderValue::from_str(&format!("Bearer {}", token)) {
                Ok(mut value) => {
                    value.set_sensitive(true);
                    headers.insert(AUTHORIZATION, value);
                }
                Err(_) => warn!("Stored credential is not a valid header value; sending without it"),
            }
        }

        debug!(
            request_id = %request.id,
            authenticated = sent_with.is_some(),
            replayed = request.is_replayed(),
            "Dispatching {} {}",
            request.method,
            request.path
        );

        let result = self.transport.send(request, headers).await;
        Dispatched { result, sent_with }
    }

    /// Sends without any credential, for calls that must not carry one (the
    /// renewal call itself). Any Authorization header on the snapshot is dropped.
    pub async fn send_unauthenticated(
        &self,
        request: &PendingRequest,
    ) -> Result<RawResponse, TransportError> {
        let mut headers: HeaderMap = request.headers.clone();
        headers.remove(AUTHORIZATION);
        debug!(request_id = %request.id, "Dispatching unauthenticated {} {}", request.method, request.path);
        self.transport.send(request, headers).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::MemoryStorage;
    use async_trait::async_trait;
    use http::StatusCode;
    use std::sync::Mutex;

    /// Records the headers of every request it sees.
    #[derive(Default)]
    struct RecordingTransport {
        seen: Mutex<Vec<HeaderMap>>,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send(
            &self,
            _request: &PendingRequest,
            headers: HeaderMap,
        ) -> Result<RawResponse, TransportError> {
            self.seen.lock().unwrap().push(headers);
            Ok(RawResponse::new(StatusCode::UNAUTHORIZED, Vec::new()))
        }
    }

    fn setup() -> (Dispatcher, Arc<RecordingTransport>, Arc<CredentialStore>) {
        let transport = Arc::new(RecordingTransport::default());
        let credentials = Arc::new(CredentialStore::new(
            Arc::new(MemoryStorage::new()),
            "access_token",
        ));
        (
            Dispatcher::new(transport.clone(), credentials.clone()),
            transport,
            credentials,
        )
    }

    #[tokio::test]
    async fn test_attaches_current_credential() {
        let (dispatcher, transport, credentials) = setup();
        credentials.set("tok-1");

        let dispatched = dispatcher.send(&PendingRequest::get("/a")).await;

        assert_eq!(dispatched.sent_with.as_deref(), Some("tok-1"));
        // the raw 401 comes back untouched
        assert_eq!(dispatched.result.unwrap().status, StatusCode::UNAUTHORIZED);
        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen[0].get(AUTHORIZATION).unwrap(), "Bearer tok-1");
    }

    #[tokio::test]
    async fn test_no_credential_no_header() {
        let (dispatcher, transport, _credentials) = setup();
        let dispatched = dispatcher.send(&PendingRequest::get("/a")).await;
        assert!(dispatched.sent_with.is_none());
        assert!(transport.seen.lock().unwrap()[0].get(AUTHORIZATION).is_none());
    }

    #[tokio::test]
    async fn test_credential_read_at_send_time() {
        let (dispatcher, transport, credentials) = setup();
        let request = PendingRequest::get("/a");
        credentials.set("old");
        dispatcher.send(&request).await;
        credentials.set("new");
        dispatcher.send(&request).await;

        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen[0].get(AUTHORIZATION).unwrap(), "Bearer old");
        assert_eq!(seen[1].get(AUTHORIZATION).unwrap(), "Bearer new");
    }

    #[tokio::test]
    async fn test_unauthenticated_send_strips_authorization() {
        let (dispatcher, transport, credentials) = setup();
        credentials.set("expired");
        let request = PendingRequest::post("/auth/refresh")
            .with_header(AUTHORIZATION, HeaderValue::from_static("Bearer expired"));

        dispatcher.send_unauthenticated(&request).await.unwrap();

        assert!(transport.seen.lock().unwrap()[0].get(AUTHORIZATION).is_none());
    }
}

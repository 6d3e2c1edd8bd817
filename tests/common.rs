#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bearer_relay::config::ConfigV1;
use bearer_relay::credential::MemoryStorage;
use bearer_relay::navigation::ChannelNavigator;
use bearer_relay::transport::{RawResponse, Transport, TransportError};
use bearer_relay::{ApiClient, PendingRequest, Session, SessionParts};
use http::{HeaderMap, StatusCode};
use reqwest::cookie::Jar;
use reqwest::Url;
use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;

pub const API_URL: &str = "https://api.example.test";
pub const STALE: &str = "stale";
pub const FRESH: &str = "fresh";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewalScript {
    Succeed,
    Reject,
}

/// Answers 401 to anything not carrying the fresh credential, and serves the
/// renewal endpoint after a short delay so concurrent failures pile up.
pub struct ScriptedTransport {
    renewal: RenewalScript,
    renewal_delay: Duration,
    reject_fresh: bool,
    renewal_calls: AtomicUsize,
    sends: Mutex<Vec<(String, Option<String>)>>,
}

impl ScriptedTransport {
    pub fn new(renewal: RenewalScript) -> Self {
        ScriptedTransport {
            renewal,
            renewal_delay: Duration::from_millis(50),
            reject_fresh: false,
            renewal_calls: AtomicUsize::new(0),
            sends: Mutex::new(Vec::new()),
        }
    }

    /// Makes the backend reject even the renewed credential.
    pub fn rejecting_everything(mut self) -> Self {
        self.reject_fresh = true;
        self
    }

    pub fn renewal_calls(&self) -> usize {
        self.renewal_calls.load(Ordering::SeqCst)
    }

    /// (path, authorization) of every non-renewal request, in arrival order.
    pub fn sends(&self) -> Vec<(String, Option<String>)> {
        self.sends.lock().unwrap().clone()
    }

    pub fn sends_to(&self, path: &str) -> usize {
        self.sends().iter().filter(|(p, _)| p == path).count()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(
        &self,
        request: &PendingRequest,
        headers: HeaderMap,
    ) -> Result<RawResponse, TransportError> {
        let auth = headers
            .get(http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if request.path == "/auth/refresh" {
            assert!(auth.is_none(), "renewal must not carry a bearer credential");
            self.renewal_calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.renewal_delay).await;
            return Ok(match self.renewal {
                RenewalScript::Succeed => RawResponse::new(
                    StatusCode::OK,
                    json!({ "access_token": FRESH }).to_string(),
                ),
                RenewalScript::Reject => RawResponse::new(
                    StatusCode::UNAUTHORIZED,
                    r#"{"detail": "Refresh session expired"}"#,
                ),
            });
        }

        self.sends
            .lock()
            .unwrap()
            .push((request.path.clone(), auth.clone()));

        let fresh = format!("Bearer {}", FRESH);
        if auth.as_deref() == Some(fresh.as_str()) && !self.reject_fresh {
            Ok(RawResponse::new(
                StatusCode::OK,
                json!({ "path": request.path }).to_string(),
            ))
        } else {
            Ok(RawResponse::new(
                StatusCode::UNAUTHORIZED,
                r#"{"detail": "Token expired"}"#,
            ))
        }
    }
}

pub struct Harness {
    pub client: ApiClient,
    pub transport: Arc<ScriptedTransport>,
    pub navigations: UnboundedReceiver<String>,
}

/// A signed-in client whose credential the backend already considers stale.
pub fn harness(transport: ScriptedTransport) -> Harness {
    let config = ConfigV1::for_base_url(API_URL);
    let transport = Arc::new(transport);
    let (navigator, navigations) = ChannelNavigator::new();

    let session = Session::new(
        &config,
        SessionParts {
            transport: transport.clone(),
            storage: Arc::new(MemoryStorage::new()),
            jar: Arc::new(Jar::default()),
            cookie_url: Url::parse(API_URL).unwrap(),
            navigator: Arc::new(navigator),
        },
    );
    session.login(STALE, None);

    Harness {
        client: ApiClient::new(Arc::new(session)),
        transport,
        navigations,
    }
}

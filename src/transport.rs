//! The wire. Everything above this module talks to the backend through the
//! [`Transport`] trait so tests can swap in a scripted implementation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use http::{HeaderMap, StatusCode};
use reqwest::cookie::Jar;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Url};
use tracing::debug;

use crate::request::{MultipartPart, PendingRequest, RequestBody};

/// A response as it came off the wire, any status.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn new(status: StatusCode, body: impl Into<Vec<u8>>) -> Self {
        RawResponse {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn header_str(&self, name: http::header::HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// No response was received.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("could not connect: {0}")]
    Connect(String),
    #[error("request timed out")]
    Timeout,
    #[error("request failed: {0}")]
    Request(String),
    #[error("failed to read response body: {0}")]
    Body(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else if err.is_body() || err.is_decode() {
            TransportError::Body(err.to_string())
        } else {
            TransportError::Request(err.to_string())
        }
    }
}

/// Sends a request with the given headers and hands back the raw result.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        request: &PendingRequest,
        headers: HeaderMap,
    ) -> Result<RawResponse, TransportError>;
}

/// The production transport, built on a shared `reqwest::Client`.
///
/// The client carries a cookie jar so the renewal call can present the
/// refresh-session cookie the backend set at login.
pub struct ReqwestTransport {
    client: Client,
    base_url: Url,
}

impl ReqwestTransport {
    pub fn new(base_url: Url, jar: Arc<Jar>, timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .cookie_provider(jar)
            .timeout(timeout)
            .build()?;
        Ok(ReqwestTransport { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Joins `path` onto the base URL, keeping any path prefix the base carries.
    pub fn url_for(&self, request: &PendingRequest) -> Result<Url, TransportError> {
        let joined = format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            request.path.trim_start_matches('/')
        );
        let mut url = Url::parse(&joined)
            .map_err(|e| TransportError::Request(format!("invalid URL '{}': {}", joined, e)))?;
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(request.query.iter());
        }
        Ok(url)
    }
}

fn build_form(parts: &[MultipartPart]) -> Result<Form, TransportError> {
    let mut form = Form::new();
    for part in parts {
        form = match part {
            MultipartPart::Text { name, value } => form.text(name.clone(), value.clone()),
            MultipartPart::File {
                name,
                filename,
                content_type,
                data,
            } => {
                let mut file = Part::bytes(data.clone()).file_name(filename.clone());
                if let Some(content_type) = content_type {
                    file = file.mime_str(content_type)?;
                }
                form.part(name.clone(), file)
            }
        };
    }
    Ok(form)
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(
        &self,
        request: &PendingRequest,
        headers: HeaderMap,
    ) -> Result<RawResponse, TransportError> {
        let url = self.url_for(request)?;
        debug!("Sending {} {}", request.method, url);

        let builder = self
            .client
            .request(request.method.clone(), url)
            .headers(headers);
        let builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(value),
            RequestBody::Multipart(parts) => builder.multipart(build_form(parts)?),
        };

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::Body(e.to_string()))?;

        debug!("Received status {} ({} bytes)", status, body.len());
        Ok(RawResponse {
            status,
            headers,
            body: body.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::json;

    fn transport_for(url: &str) -> ReqwestTransport {
        ReqwestTransport::new(
            Url::parse(url).unwrap(),
            Arc::new(Jar::default()),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_url_for_keeps_base_prefix_and_query() {
        let transport = transport_for("https://api.example.test/v2/");
        let request = PendingRequest::get("/items").with_query("page", "2");
        let url = transport.url_for(&request).unwrap();
        assert_eq!(url.as_str(), "https://api.example.test/v2/items?page=2");
    }

    #[tokio::test]
    async fn test_send_returns_non_success_status_uninterpreted() {
        let mut server = Server::new_async().await;
        let m = server
            .mock("GET", "/missing")
            .with_status(404)
            .with_body("nope")
            .create_async()
            .await;

        let transport = transport_for(&server.url());
        let response = transport
            .send(&PendingRequest::get("/missing"), HeaderMap::new())
            .await
            .expect("a 404 is still a response");

        m.assert_async().await;
        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert_eq!(response.text(), "nope");
    }

    #[tokio::test]
    async fn test_send_json_body_and_headers() {
        let mut server = Server::new_async().await;
        let m = server
            .mock("POST", "/items")
            .match_header("x-trace", "t1")
            .match_body(Matcher::Json(json!({"name": "widget"})))
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id": 7}"#)
            .create_async()
            .await;

        let mut headers = HeaderMap::new();
        headers.insert("x-trace", "t1".parse().unwrap());
        let request = PendingRequest::post("/items")
            .with_json(&json!({"name": "widget"}))
            .unwrap();
        let response = transport_for(&server.url())
            .send(&request, headers)
            .await
            .unwrap();

        m.assert_async().await;
        assert_eq!(response.status, StatusCode::CREATED);
        assert_eq!(
            response.header_str(http::header::CONTENT_TYPE),
            Some("application/json")
        );
    }

    #[tokio::test]
    async fn test_send_multipart() {
        let mut server = Server::new_async().await;
        let m = server
            .mock("POST", "/upload")
            .match_header(
                "content-type",
                Matcher::Regex("^multipart/form-data; boundary=".to_string()),
            )
            .match_body(Matcher::Regex("filename=\"notes.txt\"".to_string()))
            .with_status(200)
            .create_async()
            .await;

        let request = PendingRequest::post("/upload").with_body(RequestBody::Multipart(vec![
            MultipartPart::text("title", "notes"),
            MultipartPart::file("file", "notes.txt", Some("text/plain"), b"hello".to_vec()),
        ]));
        let response = transport_for(&server.url())
            .send(&request, HeaderMap::new())
            .await
            .unwrap();

        m.assert_async().await;
        assert!(response.is_success());
    }

    #[tokio::test]
    async fn test_connection_failure_is_transport_error() {
        // nothing listens on port 9 of localhost in a test sandbox
        let transport = transport_for("http://127.0.0.1:9");
        let result = transport
            .send(&PendingRequest::get("/a"), HeaderMap::new())
            .await;
        assert!(result.is_err());
    }
}

//! Caller-facing API: `get/post/put/patch/delete/upload/download`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use http::Method;
use reqwest::cookie::Jar;
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::config::ConfigV1;
use crate::credential::{FileStorage, MemoryStorage, SessionStorage};
use crate::error::ClassifiedError;
use crate::navigation::Navigator;
use crate::renewal::with_auth_retry;
use crate::request::{MultipartPart, PendingRequest, RequestBody};
use crate::session::{Session, SessionParts};
use crate::transport::{RawResponse, ReqwestTransport, TransportError};

/// Errors building a client from configuration.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("invalid base URL '{url}': {reason}")]
    BaseUrl { url: String, reason: String },
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// A binary response, ready to be handed to a file-save action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub filename: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl Download {
    fn from_response(path: &str, response: RawResponse) -> Self {
        let filename = response
            .header_str(CONTENT_DISPOSITION)
            .and_then(filename_from_disposition)
            .or_else(|| {
                path.split('?')
                    .next()
                    .and_then(|p| p.rsplit('/').next())
                    .filter(|segment| !segment.is_empty())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "download".to_string());
        Download {
            filename: sanitize_filename(&filename),
            content_type: response.header_str(CONTENT_TYPE).map(str::to_string),
            bytes: response.body,
        }
    }

    /// Writes the file into `dir`, returning the full path.
    pub async fn save_to(&self, dir: impl AsRef<Path>) -> std::io::Result<PathBuf> {
        let target = dir.as_ref().join(&self.filename);
        tokio::fs::write(&target, &self.bytes).await?;
        debug!("Saved {} bytes to {}", self.bytes.len(), target.display());
        Ok(target)
    }
}

fn filename_from_disposition(value: &str) -> Option<String> {
    value.split(';').map(str::trim).find_map(|param| {
        let (key, raw) = param.split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("filename") {
            return None;
        }
        let name = raw.trim().trim_matches('"');
        if name.is_empty() {
            None
        } else {
            Some(name.to_string())
        }
    })
}

// keeps only the final component so a hostile name cannot escape the target dir
fn sanitize_filename(name: &str) -> String {
    Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| *n != "." && *n != "..")
        .unwrap_or("download")
        .to_string()
}

/// The authenticated HTTP client. Clone freely; clones share one session.
#[derive(Clone)]
pub struct ApiClient {
    session: Arc<Session>,
}

impl ApiClient {
    pub fn new(session: Arc<Session>) -> Self {
        ApiClient { session }
    }

    /// Builds the production stack: reqwest transport with a cookie jar,
    /// file- or memory-backed credential mirror.
    pub fn from_config(config: &ConfigV1, navigator: Arc<dyn Navigator>) -> Result<Self, ClientError> {
        let base_url = Url::parse(&config.api.base_url).map_err(|e| ClientError::BaseUrl {
            url: config.api.base_url.clone(),
            reason: e.to_string(),
        })?;
        let jar = Arc::new(Jar::default());
        let transport = ReqwestTransport::new(
            base_url.clone(),
            jar.clone(),
            Duration::from_millis(config.api.timeout_in_ms),
        )?;
        let storage: Arc<dyn SessionStorage> = match &config.session.storage_path {
            Some(path) => Arc::new(FileStorage::new(path)),
            None => Arc::new(MemoryStorage::new()),
        };

        let session = Session::new(
            config,
            SessionParts {
                transport: Arc::new(transport),
                storage,
                jar,
                cookie_url: base_url,
                navigator,
            },
        );
        Ok(ApiClient::new(Arc::new(session)))
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Sends a prepared request through the auth-retry path and returns the raw success.
    pub async fn send(&self, request: PendingRequest) -> Result<RawResponse, ClassifiedError> {
        with_auth_retry(
            self.session.dispatcher(),
            self.session.coordinator(),
            request,
        )
        .await
    }

    pub async fn request<T: DeserializeOwned>(&self, request: PendingRequest) -> Result<T, ClassifiedError> {
        let response = self.send(request).await?;
        decode(&response)
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClassifiedError> {
        self.request(PendingRequest::get(path)).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClassifiedError> {
        self.request(with_json(Method::POST, path, body)?).await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClassifiedError> {
        self.request(with_json(Method::PUT, path, body)?).await
    }

    pub async fn patch<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClassifiedError> {
        self.request(with_json(Method::PATCH, path, body)?).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClassifiedError> {
        self.request(PendingRequest::new(Method::DELETE, path)).await
    }

    /// Sends `parts` as multipart/form-data.
    pub async fn upload<T: DeserializeOwned>(
        &self,
        path: &str,
        parts: Vec<MultipartPart>,
    ) -> Result<T, ClassifiedError> {
        let request = PendingRequest::post(path).with_body(RequestBody::Multipart(parts));
        self.request(request).await
    }

    /// Fetches a binary resource.
    ///
    /// The body is buffered in memory, since a 401 must be classified and the
    /// request replayed before anything reaches disk. Not suited to very large files.
    pub async fn download(&self, path: &str) -> Result<Download, ClassifiedError> {
        let response = self.send(PendingRequest::get(path)).await?;
        Ok(Download::from_response(path, response))
    }
}

fn with_json<B: Serialize + ?Sized>(
    method: Method,
    path: &str,
    body: &B,
) -> Result<PendingRequest, ClassifiedError> {
    PendingRequest::new(method, path)
        .with_json(body)
        .map_err(|e| ClassifiedError::unknown(format!("Could not encode request body: {}", e)))
}

/// Empty bodies decode as JSON `null`, so `()` and `Option<_>` work for 204s.
fn decode<T: DeserializeOwned>(response: &RawResponse) -> Result<T, ClassifiedError> {
    let result = if response.body.iter().all(u8::is_ascii_whitespace) {
        serde_json::from_str("null")
    } else {
        serde_json::from_slice(&response.body)
    };
    result.map_err(|e| ClassifiedError::unknown(format!("Unexpected response from server: {}", e)))
}

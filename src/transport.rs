//! The HTTP boundary.
//!
//! Everything above this module talks to the platform through the
//! [`Transport`] trait, so the same pagination and polling code runs against
//! [`HttpTransport`] in production and against a scripted transport in tests.

use log::{debug, warn};
use reqwest::Method;
use reqwest::blocking::{Body, Client as HttpClient, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::thread;
use std::time::Duration;

use crate::config::ClientConfig;
use crate::error::{Error, Result, error_from_response};
use crate::util::{retriable_status, retry_delay};

/// A JSON call against the platform API.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            body: None,
        }
    }

    pub fn new(method: Method, url: impl Into<String>, body: Option<Value>) -> Self {
        Self {
            method,
            url: url.into(),
            body,
        }
    }
}

/// Raw answer to an [`ApiRequest`]; non-success statuses are not errors at this level.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Content pushed to a pre-signed upload URL.
pub enum UploadBody {
    File { file: File, len: u64 },
    Json(Value),
}

impl fmt::Debug for UploadBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadBody::File { len, .. } => write!(f, "File({} bytes)", len),
            UploadBody::Json(_) => f.write_str("Json"),
        }
    }
}

/// An open download; `content_length` is what the server advertised, if anything.
pub struct DownloadStream {
    pub content_length: Option<u64>,
    pub reader: Box<dyn Read + Send>,
}

pub trait Transport: fmt::Debug + Send + Sync {
    /// Sends one authenticated API call. Implementations do not retry.
    fn send(&self, request: &ApiRequest) -> Result<ApiResponse>;

    /// Streams `body` to a pre-signed blob store URL with a PUT.
    fn upload(&self, url: &str, body: UploadBody) -> Result<()>;

    /// Opens a (pre-signed) download URL.
    fn download(&self, url: &str) -> Result<DownloadStream>;
}

/// How many times, and how patiently, a failed call is sent again.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    pub(crate) max_retries: u32,
    pub(crate) backoff_factor: Duration,
}

/// Sends `request`, retrying connection failures and, for GETs only, throttled or
/// gateway responses. Non-idempotent requests are never replayed on a status code.
pub(crate) fn send_with_retry(
    transport: &dyn Transport,
    policy: RetryPolicy,
    request: &ApiRequest,
) -> Result<ApiResponse> {
    let mut attempt = 0u32;
    loop {
        match transport.send(request) {
            Ok(resp) => {
                let retry = request.method == Method::GET
                    && retriable_status(resp.status)
                    && attempt < policy.max_retries;
                if !retry {
                    return Ok(resp);
                }
                attempt += 1;
                let delay = retry_delay(policy.backoff_factor, attempt);
                warn!(
                    "HTTP {} for {} {}, retry {}/{} in {:?}",
                    resp.status, request.method, request.url, attempt, policy.max_retries, delay
                );
                thread::sleep(delay);
            }
            Err(err) if err.is_retriable() && attempt < policy.max_retries => {
                attempt += 1;
                let delay = retry_delay(policy.backoff_factor, attempt);
                warn!(
                    "{}, retry {}/{} in {:?}",
                    err, attempt, policy.max_retries, delay
                );
                thread::sleep(delay);
            }
            Err(err) => return Err(err),
        }
    }
}

/// [`Transport`] over a pooled blocking `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    api_key: String,
    /// API calls, bounded by the configured request timeout.
    http: HttpClient,
    /// Blob store transfers, which can legitimately take a long time.
    blob: HttpClient,
}

impl HttpTransport {
    pub fn new(cfg: &ClientConfig) -> Result<Self> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("picterra-rs/{}", env!("CARGO_PKG_VERSION")))
                .unwrap_or(HeaderValue::from_static("picterra-rs")),
        );

        let http = HttpClient::builder()
            .default_headers(default_headers.clone())
            .timeout(cfg.request_timeout)
            .danger_accept_invalid_certs(!cfg.verify)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;
        let blob = HttpClient::builder()
            .default_headers(default_headers)
            .timeout(None)
            .danger_accept_invalid_certs(!cfg.verify)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            api_key: cfg.api_key.trim().to_string(),
            http,
            blob,
        })
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: &ApiRequest) -> Result<ApiResponse> {
        let mut req = self
            .http
            .request(request.method.clone(), &request.url)
            .header("X-Api-Key", &self.api_key);
        if let Some(body) = &request.body {
            req = req.json(body);
        }
        let resp = req
            .send()
            .map_err(|e| Error::transport(&request.url, e))?;
        let status = resp.status().as_u16();
        let body = resp
            .text()
            .map_err(|e| Error::transport(&request.url, e))?;
        Ok(ApiResponse { status, body })
    }

    fn upload(&self, url: &str, body: UploadBody) -> Result<()> {
        // Pre-signed URLs carry their own authorization; the API key stays off them.
        let req = match body {
            UploadBody::File { file, len } => {
                debug!("streaming {} byte(s) to blob store", len);
                self.blob.put(url).body(Body::sized(file, len))
            }
            UploadBody::Json(value) => self.blob.put(url).json(&value),
        };
        let resp = req.send().map_err(|e| Error::transport(url, e))?;
        check_status(resp, url).map(|_| ())
    }

    fn download(&self, url: &str) -> Result<DownloadStream> {
        let resp = self
            .blob
            .get(url)
            .send()
            .map_err(|e| Error::transport(url, e))?;
        let resp = check_status(resp, url)?;
        Ok(DownloadStream {
            content_length: resp.content_length(),
            reader: Box::new(resp),
        })
    }
}

fn check_status(resp: Response, url: &str) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let text = resp.text().unwrap_or_default();
    Err(error_from_response(status.as_u16(), url, &text))
}

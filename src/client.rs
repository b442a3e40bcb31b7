use log::{debug, error, info};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::{ClientConfig, load_config};
use crate::download::{read_json, stream_to_file};
use crate::error::{Error, Result, error_from_response};
use crate::models::{RemoteFile, UploadSlot};
use crate::operation::{Operation, OperationStatusResponse, PollPolicy, wait_until_complete};
use crate::pagination::ResultsPage;
use crate::transport::{
    ApiRequest, ApiResponse, HttpTransport, RetryPolicy, Transport, UploadBody, send_with_retry,
};
use crate::util::{guess_filename_from_url, urljoin, with_query};

/// Path of the detector platform API below the platform root.
const API_PATH: &str = "public/api/v2/";

#[derive(Debug, Clone)]
pub struct Client {
    api_url: String,

    retry: RetryPolicy,
    poll: PollPolicy,
    progress: bool,

    transport: Arc<dyn Transport>,
}

impl Client {
    /// Creates a client from `PICTERRA_API_KEY` / `PICTERRA_BASE_URL` and/or `.picterrarc`.
    ///
    /// This is equivalent to `Client::new(None, None, None)`.
    pub fn from_env() -> Result<Self> {
        Self::new(None, None, None)
    }

    /// Creates a client using (in order of precedence):
    /// - explicit `base_url`/`api_key` arguments
    /// - environment variables `PICTERRA_BASE_URL` / `PICTERRA_API_KEY`
    /// - config file from `PICTERRA_RC` or `.picterrarc`
    pub fn new(
        base_url: Option<String>,
        api_key: Option<String>,
        verify: Option<bool>,
    ) -> Result<Self> {
        Self::from_config(load_config(base_url, api_key, verify)?)
    }

    pub fn from_config(cfg: ClientConfig) -> Result<Self> {
        let transport = HttpTransport::new(&cfg)?;
        Ok(Self::with_transport(cfg, Arc::new(transport)))
    }

    /// Creates a client sending everything through `transport`; the API key in
    /// `cfg` is only used by transports that read it themselves.
    pub fn with_transport(cfg: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        let api_url = urljoin(&cfg.base_url, API_PATH);
        info!(
            "Using base_url={}, api_url={}; {} max retries, {:?} backoff and {:?} timeout.",
            cfg.base_url, api_url, cfg.max_retries, cfg.backoff_factor, cfg.request_timeout
        );
        Self {
            api_url,
            retry: RetryPolicy {
                max_retries: cfg.max_retries,
                backoff_factor: cfg.backoff_factor,
            },
            poll: cfg.poll,
            progress: true,
            transport,
        }
    }

    /// Fixed delay between operation polls, overriding the server's suggestion.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll.interval = Some(interval);
        self
    }

    /// Growth factor of the poll interval, capped by [`with_max_poll_interval`](Self::with_max_poll_interval).
    pub fn with_poll_backoff(mut self, factor: f64) -> Self {
        self.poll.backoff = factor;
        self
    }

    pub fn with_max_poll_interval(mut self, max: Duration) -> Self {
        self.poll.max_interval = max;
        self
    }

    /// Maximum time to wait for a single operation.
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.poll.timeout = Some(timeout);
        self
    }

    pub fn with_max_polls(mut self, max_polls: usize) -> Self {
        self.poll.max_polls = Some(max_polls);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.retry.max_retries = max_retries;
        self
    }

    pub fn with_backoff_factor(mut self, factor: Duration) -> Self {
        self.retry.backoff_factor = factor;
        self
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    pub(crate) fn endpoint(&self, path: &str) -> String {
        urljoin(&self.api_url, path)
    }

    /// Sends an API call and fails on any non-success status.
    fn call(&self, method: Method, url: &str, body: Option<Value>) -> Result<ApiResponse> {
        let request = ApiRequest::new(method, url, body);
        let resp = send_with_retry(self.transport.as_ref(), self.retry, &request)?;
        if !resp.is_success() {
            return Err(error_from_response(resp.status, url, &resp.body));
        }
        Ok(resp)
    }

    /// Like [`call`](Self::call) but requires one specific status code.
    pub(crate) fn call_expecting(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        expected: u16,
    ) -> Result<ApiResponse> {
        let url = self.endpoint(path);
        let resp = self.call(method, &url, body)?;
        if resp.status != expected {
            return Err(Error::unexpected(
                &url,
                format!("expected HTTP {}, got {}: {}", expected, resp.status, resp.body),
            ));
        }
        Ok(resp)
    }

    pub(crate) fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.endpoint(path);
        let resp = self.call(Method::GET, &url, None)?;
        parse(&url, &resp)
    }

    pub(crate) fn post_json<T: DeserializeOwned>(&self, path: &str, body: Option<Value>) -> Result<T> {
        let url = self.endpoint(path);
        let resp = self.call(Method::POST, &url, body)?;
        parse(&url, &resp)
    }

    pub(crate) fn put(&self, path: &str, body: Value) -> Result<ApiResponse> {
        self.call(Method::PUT, &self.endpoint(path), Some(body))
    }

    pub(crate) fn delete(&self, path: &str) -> Result<()> {
        self.call(Method::DELETE, &self.endpoint(path), None)
            .map(|_| ())
    }

    pub(crate) fn list<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<ResultsPage<T>> {
        let url = with_query(&self.endpoint(path), query)?;
        ResultsPage::fetch(self.transport.clone(), self.retry, &url)
    }

    /// Streams a local file to a pre-signed upload URL.
    pub(crate) fn upload_file(&self, slot: &UploadSlot, path: &Path) -> Result<()> {
        ensure_file(path)?;
        let file = File::open(path)
            .map_err(|e| Error::io(format!("failed to open {}", path.display()), e))?;
        let len = file
            .metadata()
            .map_err(|e| Error::io(format!("failed to stat {}", path.display()), e))?
            .len();
        debug!("Opening and streaming to upload file {}", path.display());
        self.transport
            .upload(&slot.upload_url, UploadBody::File { file, len })
            .inspect_err(|_| error!("Error when uploading to blobstore {}", slot.upload_url))
    }

    pub(crate) fn upload_json(&self, slot: &UploadSlot, value: &Value) -> Result<()> {
        self.transport
            .upload(&slot.upload_url, UploadBody::Json(value.clone()))
            .inspect_err(|_| error!("Error when uploading to blobstore {}", slot.upload_url))
    }

    /// Starts a server-side operation without waiting for it.
    pub fn trigger(&self, path: &str, body: Option<Value>) -> Result<Operation> {
        self.post_json(path, body)
    }

    /// Current status of an operation.
    pub fn operation_status(&self, operation_id: &str) -> Result<OperationStatusResponse> {
        self.get_json(&format!("operations/{}/", operation_id))
    }

    /// Blocks until `operation` succeeds, fails, or the poll budget runs out.
    pub fn wait_for_operation(&self, operation: &Operation) -> Result<OperationStatusResponse> {
        let start = Instant::now();
        wait_until_complete(
            operation,
            &self.poll,
            || self.operation_status(&operation.operation_id),
            thread::sleep,
            || start.elapsed(),
        )
    }

    /// Triggers an operation at `path` and waits for it to complete.
    pub fn run_operation(
        &self,
        path: &str,
        body: Option<Value>,
    ) -> Result<(Operation, OperationStatusResponse)> {
        let operation = self.trigger(path, body)?;
        let status = self.wait_for_operation(&operation)?;
        Ok((operation, status))
    }

    /// Returns the `results` of a finished operation.
    pub fn get_operation_results(&self, operation_id: &str) -> Result<Value> {
        let path = format!("operations/{}/", operation_id);
        let mut op: Value = self.get_json(&path)?;
        match op.get_mut("results").map(Value::take) {
            Some(results) if !results.is_null() => Ok(results),
            _ => Err(Error::unexpected(
                &self.endpoint(&path),
                format!("operation {} has no results", operation_id),
            )),
        }
    }

    /// Downloads `file` to `target`; an empty `target` uses the URL's file name.
    pub fn download(&self, file: &RemoteFile, target: &Path) -> Result<PathBuf> {
        let target = if target.as_os_str().is_empty() {
            guess_filename_from_url(&file.location)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("download"))
        } else {
            target.to_path_buf()
        };

        let mut stream = self.transport.download(&file.location)?;
        if stream.content_length.is_none() {
            stream.content_length = file.content_length;
        }
        stream_to_file(&file.location, stream, &target, self.progress)
    }

    pub(crate) fn download_url(&self, url: &str, target: &Path) -> Result<PathBuf> {
        let file = RemoteFile {
            location: url.to_string(),
            content_length: None,
        };
        self.download(&file, target)
    }

    pub(crate) fn fetch_json(&self, url: &str) -> Result<Value> {
        read_json(url, self.transport.download(url)?)
    }
}

fn parse<T: DeserializeOwned>(url: &str, resp: &ApiResponse) -> Result<T> {
    serde_json::from_str(&resp.body).map_err(|e| {
        Error::unexpected(
            url,
            format!("failed to parse API JSON (status={}): {}", resp.status, e),
        )
    })
}

/// Rejects upload sources that are not regular files before any request goes out.
pub(crate) fn ensure_file(path: &Path) -> Result<()> {
    if path.is_file() {
        return Ok(());
    }
    Err(Error::Validation {
        message: format!("Invalid file: {}", path.display()),
        fields: None,
    })
}

/// Reads a required string field out of an operation payload.
pub(crate) fn required_str(value: Option<&Value>, pointer: &str, context: &str) -> Result<String> {
    value
        .and_then(|v| v.pointer(pointer))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::unexpected(context, format!("missing {} in operation payload", pointer)))
}

//! In-memory platform used by the workflow tests.

#![allow(dead_code)]

use picterra::transport::{ApiRequest, ApiResponse, DownloadStream, Transport, UploadBody};
use picterra::{Client, ClientConfig, Error, Result};
use reqwest::Method;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const API: &str = "https://app.picterra.ch/public/api/v2/";

pub fn api(path: &str) -> String {
    format!("{}{}", API, path)
}

#[derive(Debug, Clone)]
pub enum Blob {
    Complete(Vec<u8>),
    /// Advertises `advertised` bytes but the body stops after `sent`.
    Truncated { sent: Vec<u8>, advertised: u64 },
}

#[derive(Debug, Default)]
struct State {
    routes: HashMap<(Method, String), VecDeque<(u16, String)>>,
    requests: Vec<ApiRequest>,
    uploads: Vec<String>,
    failing_uploads: HashSet<String>,
    blobs: HashMap<String, Blob>,
    downloads: Vec<String>,
}

/// Replies to API calls from per-route scripts. The last reply of a script
/// repeats forever; unscripted routes answer 404.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    state: Mutex<State>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on(&self, method: Method, url: &str, status: u16, body: Value) -> &Self {
        self.state
            .lock()
            .unwrap()
            .routes
            .entry((method, url.to_string()))
            .or_default()
            .push_back((status, body.to_string()));
        self
    }

    pub fn blob(&self, url: &str, blob: Blob) -> &Self {
        self.state
            .lock()
            .unwrap()
            .blobs
            .insert(url.to_string(), blob);
        self
    }

    pub fn fail_upload(&self, url: &str) -> &Self {
        self.state
            .lock()
            .unwrap()
            .failing_uploads
            .insert(url.to_string());
        self
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn count(&self, method: Method, url: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.method == method && r.url == url)
            .count()
    }

    pub fn uploads(&self) -> Vec<String> {
        self.state.lock().unwrap().uploads.clone()
    }

    pub fn downloads(&self) -> Vec<String> {
        self.state.lock().unwrap().downloads.clone()
    }
}

impl Transport for ScriptedTransport {
    fn send(&self, request: &ApiRequest) -> Result<ApiResponse> {
        let mut state = self.state.lock().unwrap();
        state.requests.push(request.clone());
        let key = (request.method.clone(), request.url.clone());
        let (status, body) = match state.routes.get_mut(&key) {
            Some(script) if script.len() > 1 => script.pop_front().unwrap(),
            Some(script) if script.len() == 1 => script[0].clone(),
            _ => (404, r#"{"detail":"Not found."}"#.to_string()),
        };
        Ok(ApiResponse { status, body })
    }

    fn upload(&self, url: &str, body: UploadBody) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.uploads.push(url.to_string());
        if let UploadBody::File { len, .. } = body {
            assert!(len > 0, "uploaded an empty file");
        }
        if state.failing_uploads.contains(url) {
            return Err(Error::Api {
                status: 403,
                url: url.to_string(),
                message: "SignatureDoesNotMatch".into(),
            });
        }
        Ok(())
    }

    fn download(&self, url: &str) -> Result<DownloadStream> {
        let mut state = self.state.lock().unwrap();
        state.downloads.push(url.to_string());
        match state.blobs.get(url).cloned() {
            Some(Blob::Complete(bytes)) => Ok(DownloadStream {
                content_length: Some(bytes.len() as u64),
                reader: Box::new(Cursor::new(bytes)),
            }),
            Some(Blob::Truncated { sent, advertised }) => Ok(DownloadStream {
                content_length: Some(advertised),
                reader: Box::new(Cursor::new(sent)),
            }),
            None => Err(Error::NotFound {
                url: url.to_string(),
                message: "no such blob".into(),
            }),
        }
    }
}

/// A client polling every millisecond and retrying without delay.
pub fn client(transport: &Arc<ScriptedTransport>) -> Client {
    let cfg = ClientConfig::new("https://app.picterra.ch/", "1234");
    Client::with_transport(cfg, transport.clone())
        .with_poll_interval(Duration::from_millis(1))
        .with_backoff_factor(Duration::ZERO)
        .with_progress(false)
}

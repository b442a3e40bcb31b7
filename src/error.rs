use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use crate::operation::OperationStatus;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors returned by the client.
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or rejected API key (HTTP 401/403).
    #[error("authentication failed: {message}")]
    Authentication { message: String },

    #[error("not found (url={url}): {message}")]
    NotFound { url: String, message: String },

    /// Malformed request. `fields` holds the server's per-field detail when it sent one.
    #[error("invalid request: {message}")]
    Validation {
        message: String,
        fields: Option<Value>,
    },

    #[error("operation {operation_id} failed: {reason}")]
    OperationFailed { operation_id: String, reason: String },

    /// The polling budget ran out while the operation was still in progress server-side.
    #[error("operation {operation_id} still {last_status} after waiting {waited:?}")]
    Timeout {
        operation_id: String,
        last_status: OperationStatus,
        waited: Duration,
    },

    #[error("could not reach {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("unexpected response from {url}: {message}")]
    UnexpectedResponse { url: String, message: String },

    #[error("API request failed: HTTP {status} for url ({url})\n{message}")]
    Api {
        status: u16,
        url: String,
        message: String,
    },

    #[error("index {index} out of range for a page of {len} item(s)")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("{0}")]
    Config(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Error::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn transport<E>(url: &str, source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Error::Transport {
            url: url.to_string(),
            source: source.into(),
        }
    }

    pub(crate) fn unexpected(url: &str, message: impl Into<String>) -> Self {
        Error::UnexpectedResponse {
            url: url.to_string(),
            message: message.into(),
        }
    }

    /// Whether a failed request may be sent again.
    ///
    /// Only failures to establish a connection qualify. Malformed requests,
    /// read timeouts and broken response bodies are surfaced as they are since
    /// the server may already have acted on the request.
    pub fn is_retriable(&self) -> bool {
        let Error::Transport { source, .. } = self else {
            return false;
        };
        if let Some(e) = source.downcast_ref::<reqwest::Error>() {
            return e.is_connect();
        }
        source.downcast_ref::<std::io::Error>().is_some_and(|e| {
            matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
            )
        })
    }
}

/// Error payloads come in a few shapes:
/// `{"detail": "..."}`, `{"message": "..."}` or a field map `{"name": ["required"]}`.
#[derive(Debug, serde::Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    detail: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Maps a non-success HTTP response onto an [`Error`].
pub(crate) fn error_from_response(status: u16, url: &str, body: &str) -> Error {
    let json = serde_json::from_str::<Value>(body).ok();
    let parsed = json
        .as_ref()
        .and_then(|v| serde_json::from_value::<ApiErrorBody>(v.clone()).ok());
    let message = parsed
        .as_ref()
        .and_then(|b| b.detail.clone().or_else(|| b.message.clone()))
        .unwrap_or_else(|| body.trim().to_string());

    match status {
        401 | 403 => Error::Authentication {
            message: format!(
                "HTTP {} (check PICTERRA_API_KEY and that it is valid for this platform): {}",
                status, message
            ),
        },
        404 => Error::NotFound {
            url: url.to_string(),
            message,
        },
        400 | 422 => {
            let fields = json.filter(|v| {
                v.as_object()
                    .is_some_and(|m| !m.contains_key("detail") && !m.contains_key("message"))
            });
            Error::Validation { message, fields }
        }
        _ => Error::Api {
            status,
            url: url.to_string(),
            message,
        },
    }
}

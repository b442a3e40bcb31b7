use reqwest::Url;
use std::time::Duration;

use crate::error::{Error, Result};

pub(crate) fn retriable_status(code: u16) -> bool {
    matches!(code, 429 | 502 | 503 | 504)
}

/// Delay before retry number `attempt` (1-based): `factor * 2^(attempt - 1)`.
pub(crate) fn retry_delay(factor: Duration, attempt: u32) -> Duration {
    factor.saturating_mul(1u32 << attempt.saturating_sub(1).min(16))
}

pub(crate) fn backoff(current: Duration, factor: f64, max: Duration) -> Duration {
    let next = Duration::from_secs_f64(current.as_secs_f64() * factor.max(1.0));
    if next > max { max } else { next }
}

/// Last path segment of a download URL, ignoring its (signed) query string.
pub(crate) fn guess_filename_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let name = parsed.path_segments()?.next_back()?;
    (!name.is_empty()).then(|| name.to_string())
}

pub(crate) fn urljoin(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{}/{}", base, path)
}

/// Appends url-encoded query parameters.
pub(crate) fn with_query(url: &str, params: &[(&str, String)]) -> Result<String> {
    if params.is_empty() {
        return Ok(url.to_string());
    }
    let mut parsed =
        Url::parse(url).map_err(|e| Error::Config(format!("invalid url {}: {}", url, e)))?;
    {
        let mut pairs = parsed.query_pairs_mut();
        for (k, v) in params {
            pairs.append_pair(k, v);
        }
    }
    Ok(parsed.into())
}

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::operation::PollPolicy;

pub(crate) const DEFAULT_BASE_URL: &str = "https://app.picterra.ch/";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Platform root, typically `https://app.picterra.ch/`.
    pub base_url: String,
    /// API key, sent as `X-Api-Key` on every API call.
    pub api_key: String,
    /// Whether to verify TLS certificates.
    pub verify: bool,
    /// Timeout of a single API call. Uploads and downloads are not bounded by it.
    pub request_timeout: Duration,
    /// Retries for connection failures and throttled/gateway GETs.
    pub max_retries: u32,
    /// Base of the exponential retry delay.
    pub backoff_factor: Duration,
    pub poll: PollPolicy,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            verify: true,
            request_timeout: Duration::from_secs(30),
            max_retries: 3,
            backoff_factor: Duration::from_secs(10),
            poll: PollPolicy::default(),
        }
    }
}

#[derive(Debug, Default)]
struct RcConfig {
    url: Option<String>,
    key: Option<String>,
    verify: Option<bool>,
}

/// Resolves configuration, in order of precedence, from:
/// explicit arguments, `PICTERRA_API_KEY` / `PICTERRA_BASE_URL`, then the rc file.
pub(crate) fn load_config(
    base_url: Option<String>,
    api_key: Option<String>,
    verify: Option<bool>,
) -> Result<ClientConfig> {
    let base_url = base_url.or_else(|| non_empty_env("PICTERRA_BASE_URL"));
    let api_key = api_key.or_else(|| non_empty_env("PICTERRA_API_KEY"));

    let rc = if base_url.is_none() || api_key.is_none() || verify.is_none() {
        find_rc()?
    } else {
        None
    };
    let rc = rc.unwrap_or_default();

    let api_key = api_key.or(rc.key).ok_or_else(|| {
        Error::Config(format!(
            "Missing configuration: api key (set PICTERRA_API_KEY or put `key:` in one of: {})",
            rc_candidates()
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    })?;
    let base_url = base_url
        .or(rc.url)
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

    let mut cfg = ClientConfig::new(base_url, api_key);
    cfg.verify = verify.or(rc.verify).unwrap_or(true);
    Ok(cfg)
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

const RC_FILE_NAME: &str = ".picterrarc";

fn find_rc() -> Result<Option<RcConfig>> {
    let Some(rc_path) = rc_candidates().into_iter().find(|p| p.is_file()) else {
        return Ok(None);
    };
    let text = std::fs::read_to_string(&rc_path).map_err(|e| {
        Error::io(
            format!("failed to read configuration file {}", rc_path.display()),
            e,
        )
    })?;
    Ok(Some(RcConfig::parse(&text)))
}

/// `PICTERRA_RC` when set, otherwise the working directory then the home directory.
fn rc_candidates() -> Vec<PathBuf> {
    match std::env::var_os("PICTERRA_RC") {
        Some(explicit) => vec![PathBuf::from(explicit)],
        None => [std::env::current_dir().ok(), dirs::home_dir()]
            .into_iter()
            .flatten()
            .map(|dir| dir.join(RC_FILE_NAME))
            .collect(),
    }
}

impl RcConfig {
    /// Reads `name: value` entries; blank lines and `#` comments are skipped.
    /// A bare `url:` or `key:` takes its value from the next line.
    fn parse(text: &str) -> Self {
        let mut cfg = Self::default();
        let mut lines = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .peekable();

        while let Some(line) = lines.next() {
            let Some((name, value)) = rc_entry(line) else {
                continue;
            };
            let value = match lines.next_if(|next| value.is_empty() && name != "verify" && rc_entry(next).is_none()) {
                Some(next) => unquote(next),
                None => value,
            };
            match name {
                "url" if !value.is_empty() => cfg.url = Some(value.to_string()),
                "key" if !value.is_empty() => cfg.key = Some(value.to_string()),
                "verify" if !value.is_empty() => cfg.verify = Some(value != "0"),
                _ => {}
            }
        }
        cfg
    }
}

/// Splits a line into one of the known entry names and its unquoted value.
fn rc_entry(line: &str) -> Option<(&str, &str)> {
    let (name, value) = line.split_once(':')?;
    let name = name.trim();
    matches!(name, "url" | "key" | "verify").then(|| (name, unquote(value)))
}

fn unquote(value: &str) -> &str {
    let value = value.trim();
    ['"', '\'']
        .into_iter()
        .find_map(|q| value.strip_prefix(q)?.strip_suffix(q))
        .unwrap_or(value)
}

use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use rand::Rng;
use reqwest::blocking::Client;

/// Per-attempt timeout. The job runs unattended; a hung upstream call must
/// fail the attempt, not the whole schedule.
pub const REQUEST_TIMEOUT_SECS: u64 = 25;
/// Retries after the first attempt, so three attempts total.
pub const MAX_RETRIES: u32 = 2;

const BACKOFF_BASE_MS: u64 = 750;
const BACKOFF_JITTER_MS: u64 = 500;

static CLIENT: OnceCell<Client> = OnceCell::new();

pub fn http_client() -> Result<&'static Client> {
    CLIENT.get_or_try_init(|| {
        Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent("mlb-datasync/1.0")
            .build()
            .context("failed to build http client")
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    /// Timeout, connection failure, 429, 5xx. Worth another attempt.
    Retryable,
    /// Bad request, auth failure, any other 4xx. Retrying cannot help;
    /// surfaced verbatim so an operator can act on it.
    Fatal,
}

#[derive(Debug)]
pub struct FetchError {
    pub kind: FetchErrorKind,
    message: String,
}

impl FetchError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::Retryable,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::Fatal,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == FetchErrorKind::Retryable
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for FetchError {}

/// GET a URL with the bounded retry policy: retryable failures get up to
/// [`MAX_RETRIES`] extra attempts with a short linear backoff plus jitter;
/// fatal failures abort immediately.
pub fn get_text(client: &Client, url: &str) -> Result<String, FetchError> {
    let mut last: Option<FetchError> = None;
    for attempt in 1..=MAX_RETRIES + 1 {
        match try_get(client, url) {
            Ok(body) => return Ok(body),
            Err(err) => {
                let retry = err.is_retryable() && attempt <= MAX_RETRIES;
                last = Some(err);
                if !retry {
                    break;
                }
                let jitter = rand::thread_rng().gen_range(0..=BACKOFF_JITTER_MS);
                std::thread::sleep(Duration::from_millis(
                    BACKOFF_BASE_MS * u64::from(attempt) + jitter,
                ));
            }
        }
    }
    Err(last.unwrap_or_else(|| FetchError::fatal(format!("request failed: {url}"))))
}

fn try_get(client: &Client, url: &str) -> Result<String, FetchError> {
    let resp = client
        .get(url)
        .send()
        .map_err(|err| FetchError::retryable(format!("request {url}: {err}")))?;
    let status = resp.status();
    let body = resp
        .text()
        .map_err(|err| FetchError::retryable(format!("read body {url}: {err}")))?;

    if status.is_success() {
        return Ok(body);
    }
    let snippet: String = body.chars().take(200).collect();
    if status.as_u16() == 429 || status.is_server_error() {
        return Err(FetchError::retryable(format!("http {status} from {url}")));
    }
    Err(FetchError::fatal(format!(
        "http {status} from {url}: {snippet}"
    )))
}

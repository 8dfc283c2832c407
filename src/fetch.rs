//! Dataset transport.
//!
//! `DatasetSource` returns the raw dataset body for a source string. The
//! HTTP source retries timeouts, 5xx and 429 responses with exponential
//! backoff; other failures are returned immediately.

use std::io::Read;
use std::path::Path;
use std::time::Duration;

use log::{debug, info, warn};

use crate::errors::{Error, Result};

pub trait DatasetSource: Send + Sync {
    /// Fetch the raw dataset body.
    fn fetch(&self, source: &str) -> Result<String>;
}

// ============================================================================
// HTTP
// ============================================================================

const USER_AGENT: &str = concat!("rym-genres/", env!("CARGO_PKG_VERSION"));
const BASE_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(8);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureKind {
    Retryable,
    Hard,
}

fn classify_ureq_failure(error: &ureq::Error) -> FailureKind {
    match error {
        ureq::Error::Status(code, _) => match code {
            408 | 429 | 500 | 502 | 503 | 504 => FailureKind::Retryable,
            _ => FailureKind::Hard,
        },
        ureq::Error::Transport(transport) => {
            let lowered = transport.to_string().to_ascii_lowercase();
            if lowered.contains("timed out") || lowered.contains("timeout") || lowered.contains("connection") {
                FailureKind::Retryable
            } else {
                FailureKind::Hard
            }
        }
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(6);
    BASE_BACKOFF
        .checked_mul(1u32 << exponent)
        .unwrap_or(MAX_BACKOFF)
        .min(MAX_BACKOFF)
}

pub struct HttpDatasetSource {
    agent: ureq::Agent,
    max_attempts: u32,
}

impl HttpDatasetSource {
    /// `retries` extra attempts after the first; `timeout` applies to connect and read.
    pub fn new(timeout: Duration, retries: u32) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .user_agent(USER_AGENT)
            .build();
        Self {
            agent,
            max_attempts: retries.saturating_add(1),
        }
    }

    fn fetch_once(&self, url: &str) -> std::result::Result<String, (FailureKind, String)> {
        let response = self
            .agent
            .get(url)
            .set("Accept", "application/json")
            .call()
            .map_err(|error| (classify_ureq_failure(&error), format!("request failed: {error}")))?;
        let mut body = String::new();
        response
            .into_reader()
            .read_to_string(&mut body)
            .map_err(|error| (FailureKind::Retryable, format!("failed to read response: {error}")))?;
        Ok(body)
    }
}

impl DatasetSource for HttpDatasetSource {
    fn fetch(&self, url: &str) -> Result<String> {
        let mut attempt = 1u32;
        loop {
            match self.fetch_once(url) {
                Ok(body) => {
                    info!("Fetched RYM dataset from {} ({} bytes)", url, body.len());
                    return Ok(body);
                }
                Err((FailureKind::Retryable, reason)) if attempt < self.max_attempts => {
                    let delay = backoff_delay(attempt);
                    warn!(
                        "Dataset fetch attempt {} failed ({}), retrying in {:?}",
                        attempt, reason, delay
                    );
                    std::thread::sleep(delay);
                    attempt = attempt.saturating_add(1);
                }
                Err((_, reason)) => return Err(Error::DatasetUnavailable(format!("{}: {}", url, reason))),
            }
        }
    }
}

// ============================================================================
// Local files
// ============================================================================

/// Reads the dataset from a local path or `file://` URL.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileDatasetSource;

impl DatasetSource for FileDatasetSource {
    fn fetch(&self, source: &str) -> Result<String> {
        let path = Path::new(source.strip_prefix("file://").unwrap_or(source));
        debug!("Reading RYM dataset from {}", path.display());
        std::fs::read_to_string(path)
            .map_err(|e| Error::DatasetUnavailable(format!("{}: {}", path.display(), e)))
    }
}

fn is_http(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

/// Routes HTTP(S) URLs to the network and everything else to the filesystem.
pub struct AutoDatasetSource {
    http: HttpDatasetSource,
    file: FileDatasetSource,
}

impl AutoDatasetSource {
    pub fn new(timeout: Duration, retries: u32) -> Self {
        Self {
            http: HttpDatasetSource::new(timeout, retries),
            file: FileDatasetSource,
        }
    }
}

impl DatasetSource for AutoDatasetSource {
    fn fetch(&self, source: &str) -> Result<String> {
        if source.trim().is_empty() {
            return Err(Error::DatasetUnavailable("no dataset_url configured".to_string()));
        }
        if is_http(source) {
            self.http.fetch(source)
        } else {
            self.file.fetch(source)
        }
    }
}

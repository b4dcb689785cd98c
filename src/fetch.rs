use std::path::Path;
use std::thread;
use std::time::Duration;

use camino::Utf8PathBuf;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::{info, warn};

use crate::error::OasisError;
use crate::fs_util::{ensure_absolute_dir, extract_zip, validate_zip};

/// The network seam: one GET returning the raw body.
pub trait ReportTransport: Send + Sync {
    fn get(&self, url: &str) -> Result<Vec<u8>, OasisError>;
}

impl<T: ReportTransport + ?Sized> ReportTransport for &T {
    fn get(&self, url: &str) -> Result<Vec<u8>, OasisError> {
        (**self).get(url)
    }
}

#[derive(Clone)]
pub struct OasisHttpClient {
    client: Client,
}

impl OasisHttpClient {
    pub fn new(timeout: Duration) -> Result<Self, OasisError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("oasis-fetch/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| OasisError::Http(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| OasisError::Http(err.to_string()))?;
        Ok(Self { client })
    }
}

impl ReportTransport for OasisHttpClient {
    fn get(&self, url: &str) -> Result<Vec<u8>, OasisError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| OasisError::Http(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "OASIS request failed".to_string());
            return Err(OasisError::HttpStatus { status, message });
        }
        let bytes = response
            .bytes()
            .map_err(|err| OasisError::Http(err.to_string()))?;
        Ok(bytes.to_vec())
    }
}

/// Downloads zipped report bundles and unpacks them, retrying bodies that
/// are not archives (the service answers some failures with an HTML page).
pub struct Fetcher<T: ReportTransport> {
    transport: T,
    backoff_unit: Duration,
}

impl<T: ReportTransport> Fetcher<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            backoff_unit: Duration::from_secs(1),
        }
    }

    /// Attempt `i` waits `i * unit` before attempt `i + 1`.
    pub fn with_backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn fetch(
        &self,
        url: &str,
        destination_dir: &Path,
        max_attempts: u32,
    ) -> Result<Vec<Utf8PathBuf>, OasisError> {
        let max_attempts = max_attempts.max(1);
        let destination = ensure_absolute_dir(destination_dir)?;

        let mut attempt = 1u32;
        loop {
            match self.download_archive(url) {
                Ok(body) => {
                    let files = extract_zip(&body, destination.as_std_path())?;
                    info!(url, attempt, files = files.len(), "report bundle extracted");
                    return Ok(files);
                }
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let delay = self.backoff_unit * attempt;
                    warn!(
                        url,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "download failed, retrying"
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(err) if err.is_retryable() => {
                    return Err(OasisError::Download {
                        url: url.to_string(),
                        attempts: attempt,
                        message: err.to_string(),
                    });
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn download_archive(&self, url: &str) -> Result<Vec<u8>, OasisError> {
        let body = self.transport.get(url)?;
        validate_zip(&body)?;
        Ok(body)
    }
}

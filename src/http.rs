//! HTTP transport
//!
//! The pipeline only needs "give me the body of this URL". That capability is
//! expressed as the [`HttpFetcher`] trait so parsers can be tested against
//! canned documents.

use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors that can occur while fetching a document
#[derive(Debug, Error)]
pub enum HttpError {
    /// The request could not be completed
    #[error("Request to {url} failed: {message}")]
    RequestFailed { url: String, message: String },

    /// The server answered with a non-success status
    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },
}

/// Retrieves raw documents over HTTP
pub trait HttpFetcher: Sync {
    /// Fetches the body of `url`
    fn get(&self, url: &str) -> Result<Vec<u8>, HttpError>;
}

/// Blocking reqwest based fetcher with a fixed retry budget
pub struct ReqwestFetcher {
    client: reqwest::blocking::Client,
    retries: u32,
    retry_delay: Duration,
}

impl ReqwestFetcher {
    /// Creates a fetcher which tries every request `retries + 1` times
    pub fn new(retries: u32) -> Result<Self, HttpError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| HttpError::RequestFailed {
                url: String::new(),
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            retries,
            retry_delay: Duration::from_millis(500),
        })
    }

    fn get_once(&self, url: &str) -> Result<Vec<u8>, HttpError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| HttpError::RequestFailed {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(HttpError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let body = response.bytes().map_err(|e| HttpError::RequestFailed {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        Ok(body.to_vec())
    }
}

impl HttpFetcher for ReqwestFetcher {
    fn get(&self, url: &str) -> Result<Vec<u8>, HttpError> {
        debug!(url, "GET");

        let mut attempt = 0;
        loop {
            match self.get_once(url) {
                Ok(body) => return Ok(body),
                Err(e) if attempt < self.retries => {
                    attempt += 1;
                    warn!(url, attempt, error = %e, "request failed, retrying");
                    thread::sleep(self.retry_delay * attempt);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

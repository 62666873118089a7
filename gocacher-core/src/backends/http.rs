//! HTTP remote cache.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio::time::sleep;
use tracing::debug;

use crate::error::{Error, Result};

use super::disk::validate_id;
use super::{RemoteCache, RemoteEntry};

/// Body of `GET /action/{id}`.
#[derive(Debug, Deserialize)]
struct ActionValue {
    #[serde(rename = "OutputID")]
    output_id: String,
}

/// Failure of a single request attempt.
enum AttemptError {
    /// Transport failure or 5xx; the request is tried again.
    Transient(Error),
    /// Any other failure status; returned immediately.
    Permanent(Error),
}

impl AttemptError {
    fn from_status(status: StatusCode, error: Error) -> Self {
        if status.is_server_error() {
            Self::Transient(error)
        } else {
            Self::Permanent(error)
        }
    }
}

/// Remote cache talking to a simple HTTP cache server.
///
/// The server exposes `GET /action/{action}` (JSON with the output id),
/// `GET /output/{output}` (raw body) and `PUT /{action}/{output}`.
/// Transport failures and 5xx responses are retried with exponential backoff.
#[derive(Debug, Clone)]
pub struct HttpCache {
    client: Client,
    base_url: String,
    verbose: bool,
    max_retries: u32,
    retry_delay: Duration,
}

impl HttpCache {
    /// Creates an HTTP cache for the given server prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(base_url: &str, verbose: bool) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Http(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            verbose,
            max_retries: 3,
            retry_delay: Duration::from_millis(100),
        })
    }

    /// Overrides the retry policy.
    pub fn with_retries(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn action_url(&self, action_id: &str) -> String {
        format!("{}/action/{}", self.base_url, action_id)
    }

    fn output_url(&self, output_id: &str) -> String {
        format!("{}/output/{}", self.base_url, output_id)
    }

    fn put_url(&self, action_id: &str, output_id: &str) -> String {
        format!("{}/{}/{}", self.base_url, action_id, output_id)
    }

    /// Retries an operation with exponential backoff while it fails transiently.
    async fn retry<F, Fut, T>(&self, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, AttemptError>> + Send,
    {
        let mut delay = self.retry_delay;
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            match f().await {
                Ok(result) => return Ok(result),
                Err(AttemptError::Permanent(e)) => return Err(e),
                Err(AttemptError::Transient(e)) => {
                    if self.verbose {
                        debug!(attempt, error = %e, "http cache request failed");
                    }
                    last_error = Some(e);
                    if attempt < self.max_retries {
                        sleep(delay).await;
                        delay *= 2;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::Http("All retry attempts failed".to_string())))
    }

    /// GETs `url`, returning `None` on 404.
    async fn fetch(&self, url: String) -> Result<Option<Bytes>> {
        let client = self.client.clone();
        self.retry(move || {
            let url = url.clone();
            let client = client.clone();
            async move {
                let response = client
                    .get(&url)
                    .send()
                    .await
                    .map_err(|e| {
                        AttemptError::Transient(Error::Http(format!("GET {} failed: {}", url, e)))
                    })?;

                match response.status() {
                    status if status.is_success() => {
                        let body = response.bytes().await.map_err(|e| {
                            AttemptError::Transient(Error::Http(format!(
                                "Failed to read response body: {}",
                                e
                            )))
                        })?;
                        Ok(Some(body))
                    }
                    status if status == StatusCode::NOT_FOUND => Ok(None),
                    status => {
                        let text = response.text().await.unwrap_or_default();
                        Err(AttemptError::from_status(
                            status,
                            Error::Http(format!(
                                "GET {} failed with status {}: {}",
                                url, status, text
                            )),
                        ))
                    }
                }
            }
        })
        .await
    }
}

#[async_trait]
impl RemoteCache for HttpCache {
    async fn get(&self, action_id: &str) -> Result<Option<RemoteEntry>> {
        let Some(action) = self.fetch(self.action_url(action_id)).await? else {
            if self.verbose {
                debug!(action_id, "http miss");
            }
            return Ok(None);
        };
        let action: ActionValue = serde_json::from_slice(&action)?;
        validate_id("output id", &action.output_id)?;

        let Some(body) = self.fetch(self.output_url(&action.output_id)).await? else {
            debug!(action_id, output_id = %action.output_id, "http action without output");
            return Ok(None);
        };

        if self.verbose {
            debug!(action_id, output_id = %action.output_id, size = body.len(), "http hit");
        }
        Ok(Some(RemoteEntry {
            output_id: action.output_id,
            body,
        }))
    }

    async fn put(&self, action_id: &str, output_id: &str, body: Bytes) -> Result<()> {
        let url = self.put_url(action_id, output_id);
        let client = self.client.clone();

        self.retry(move || {
            let url = url.clone();
            let client = client.clone();
            let body = body.clone();
            async move {
                let response = client
                    .put(&url)
                    .body(body)
                    .send()
                    .await
                    .map_err(|e| {
                        AttemptError::Transient(Error::Http(format!("PUT {} failed: {}", url, e)))
                    })?;

                if response.status().is_success() {
                    Ok(())
                } else {
                    let status = response.status();
                    let text = response.text().await.unwrap_or_default();
                    Err(AttemptError::from_status(
                        status,
                        Error::Http(format!(
                            "PUT {} failed with status {}: {}",
                            url, status, text
                        )),
                    ))
                }
            }
        })
        .await
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

//! HTTP clients for mirror traffic.

use crate::error::NetworkError;
use reqwest::{Client, Response};
use std::time::Duration;
use tvm_core::{Error, Result};

/// Timeout for listings, indexes and probes.
pub const METADATA_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for archive bodies.
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

const USER_AGENT: &str = concat!("tvm/", env!("CARGO_PKG_VERSION"));

/// A pair of clients: short timeouts for metadata, long for bodies.
#[derive(Debug, Clone)]
pub struct HttpClients {
    metadata: Client,
    download: Client,
}

impl HttpClients {
    /// Build clients with the default timeouts.
    pub fn new() -> Result<Self> {
        Self::with_timeouts(METADATA_TIMEOUT, DOWNLOAD_TIMEOUT)
    }

    /// Build clients with custom timeouts.
    pub fn with_timeouts(metadata: Duration, download: Duration) -> Result<Self> {
        let build = |timeout: Duration| {
            Client::builder()
                .user_agent(USER_AGENT)
                .connect_timeout(METADATA_TIMEOUT.min(timeout))
                .timeout(timeout)
                .build()
                .map_err(|e| Error::config(format!("Failed to create HTTP client: {}", e)))
        };
        Ok(Self {
            metadata: build(metadata)?,
            download: build(download)?,
        })
    }

    /// Client for listings, indexes and probes.
    pub fn metadata(&self) -> &Client {
        &self.metadata
    }

    /// Client for archive bodies.
    pub fn download(&self) -> &Client {
        &self.download
    }

    /// GET `url` with the metadata client and return the body as text.
    pub async fn get_text(&self, url: &str) -> std::result::Result<String, NetworkError> {
        let response = self
            .metadata
            .get(url)
            .send()
            .await
            .map_err(|e| NetworkError::from_reqwest(url, e))?;
        let response = check_status(url, response)?;
        response
            .text()
            .await
            .map_err(|e| NetworkError::from_reqwest(url, e))
    }
}

/// Turn an unsuccessful status into a [`NetworkError`].
pub fn check_status(url: &str, response: Response) -> std::result::Result<Response, NetworkError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(NetworkError::Status {
            status: status.as_u16(),
            url: url.to_string(),
        })
    }
}

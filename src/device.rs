//! HTTP API of the badge

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{header, redirect, Client, StatusCode, Url};
use thiserror::Error;

use crate::models::DeviceSettings;

/// Liveness endpoint of the current firmware
pub const PING_PATH: &str = "/api/v1/ping";
/// Endpoint only served by the legacy firmware
pub const SYSTEM_INFO_PATH: &str = "/api/v1/system/info";
/// Picture upload endpoint
pub const PICTURE_PATH: &str = "/api/v1/led/picture";

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("invalid device address: {0}")]
    InvalidAddress(#[from] url::ParseError),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("request timed out")]
    Timeout,
}

impl DeviceError {
    fn from_request(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else {
            Self::Request(error)
        }
    }
}

/// Operations the badge exposes over the network
///
/// Each call returns the HTTP status of the response. Transport failures are errors, but
/// non-success statuses are not: interpreting them is up to the caller.
#[async_trait]
pub trait DeviceApi: Send + Sync {
    async fn ping(&self) -> Result<StatusCode, DeviceError>;

    async fn system_info(&self) -> Result<StatusCode, DeviceError>;

    async fn post_picture(&self, payload: Bytes) -> Result<StatusCode, DeviceError>;
}

pub struct HttpDevice {
    client: Client,
    base: Url,
    probe_timeout: Duration,
    upload_timeout: Duration,
}

impl HttpDevice {
    pub fn new(settings: &DeviceSettings, probe_timeout: Duration) -> Result<Self, DeviceError> {
        let client = Client::builder()
            .redirect(redirect::Policy::none())
            .build()?;

        Ok(Self {
            client,
            base: Url::parse(&settings.address)?,
            probe_timeout,
            upload_timeout: settings.upload_timeout(),
        })
    }

    fn url(&self, path: &str) -> Result<Url, DeviceError> {
        Ok(self.base.join(path)?)
    }

    async fn probe(&self, path: &str) -> Result<StatusCode, DeviceError> {
        let response = self
            .client
            .get(self.url(path)?)
            .header(header::CACHE_CONTROL, "no-store")
            .timeout(self.probe_timeout)
            .send()
            .await
            .map_err(DeviceError::from_request)?;

        Ok(response.status())
    }
}

#[async_trait]
impl DeviceApi for HttpDevice {
    #[instrument(skip(self))]
    async fn ping(&self) -> Result<StatusCode, DeviceError> {
        self.probe(PING_PATH).await
    }

    #[instrument(skip(self))]
    async fn system_info(&self) -> Result<StatusCode, DeviceError> {
        self.probe(SYSTEM_INFO_PATH).await
    }

    #[instrument(skip(self, payload), fields(len = payload.len()))]
    async fn post_picture(&self, payload: Bytes) -> Result<StatusCode, DeviceError> {
        let response = self
            .client
            .post(self.url(PICTURE_PATH)?)
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(payload)
            .timeout(self.upload_timeout)
            .send()
            .await
            .map_err(DeviceError::from_request)?;

        Ok(response.status())
    }
}

impl std::fmt::Debug for HttpDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpDevice")
            .field("base", &self.base.as_str())
            .finish()
    }
}

use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{StatusCode, Url};
use thiserror::Error;

use super::FirmwareSource;
use crate::paths::Paths;

#[derive(Debug, Error)]
pub enum FirmwareError {
    #[error("cannot read firmware: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot download firmware: {0}")]
    Request(#[from] reqwest::Error),
    #[error("failed to fetch firmware file: {0}")]
    Status(StatusCode),
    #[error("firmware image is empty")]
    Empty,
}

/// Where the firmware image comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Firmware {
    File(PathBuf),
    Remote(Url),
}

impl Firmware {
    /// Interpret a configured location: an http(s) URL or a path with markers
    pub fn locate(location: &str, paths: &Paths) -> Self {
        match Url::parse(location) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => Self::Remote(url),
            _ => Self::File(paths.resolve_path(location)),
        }
    }
}

#[async_trait]
impl FirmwareSource for Firmware {
    #[instrument]
    async fn fetch(&self) -> Result<Bytes, FirmwareError> {
        let image: Bytes = match self {
            Self::File(path) => tokio::fs::read(path).await?.into(),
            Self::Remote(url) => {
                let response = reqwest::get(url.clone()).await?;
                if !response.status().is_success() {
                    return Err(FirmwareError::Status(response.status()));
                }

                response.bytes().await?
            }
        };

        if image.is_empty() {
            return Err(FirmwareError::Empty);
        }

        Ok(image)
    }
}

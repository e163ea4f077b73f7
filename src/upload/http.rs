//! Multipart evidence upload

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};

use super::{UploadMetadata, Uploader};
use crate::{Error, Result};

/// Uploads evidence to a fixed endpoint
///
/// The response is judged solely on its status code.
#[derive(Debug, Clone)]
pub struct HttpUploader {
    client: reqwest::Client,
    url: String,
}

impl HttpUploader {
    /// Create an uploader for `url`
    ///
    /// `accept_invalid_certs` allows kiosk endpoints with self-signed
    /// certificates.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(
        url: impl Into<String>,
        timeout: Duration,
        accept_invalid_certs: bool,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()
            .map_err(|e| Error::Upload(format!("failed to create HTTP client: {e}")))?;

        if accept_invalid_certs {
            tracing::warn!("upload TLS certificate verification disabled");
        }

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Uploader for HttpUploader {
    async fn send(&self, jpeg: Vec<u8>, metadata: &UploadMetadata) -> Result<()> {
        let image = Part::bytes(jpeg)
            .file_name(metadata.file_name())
            .mime_str("image/jpeg")?;

        let form = Form::new()
            .text("camera", metadata.camera.clone())
            .text("credential", metadata.credential.clone())
            .text("status", metadata.status.clone())
            .text("requestId", metadata.request_id.clone().unwrap_or_default())
            .part("imageFile", image);

        let response = self.client.post(&self.url).multipart(form).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Upload(format!("endpoint returned {status}")));
        }

        tracing::debug!(camera = %metadata.camera, %status, "evidence accepted");
        Ok(())
    }
}

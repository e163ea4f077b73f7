//! Detection via an HTTP inference endpoint

use std::time::Duration;

use async_trait::async_trait;

use super::{Detection, Detections, Detector};
use crate::camera::Frame;
use crate::upload::encode_jpeg;
use crate::{Error, Result};

/// Posts each frame as JPEG and expects `[{"label": .., "score": ..}]` back
#[derive(Debug, Clone)]
pub struct HttpDetector {
    client: reqwest::Client,
    url: String,
    jpeg_quality: u8,
}

impl HttpDetector {
    /// Create a detector for `url`
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(url: impl Into<String>, timeout: Duration, jpeg_quality: u8) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Detection(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: url.into(),
            jpeg_quality,
        })
    }
}

#[async_trait]
impl Detector for HttpDetector {
    async fn detect(&self, frame: &Frame) -> Result<Detections> {
        let image = frame.image.clone();
        let quality = self.jpeg_quality;
        let jpeg = tokio::task::spawn_blocking(move || encode_jpeg(&image, quality))
            .await
            .map_err(|e| Error::Detection(format!("encode task failed: {e}")))??;

        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "image/jpeg")
            .body(jpeg)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Detection(format!("inference returned {status}: {body}")));
        }

        let detections: Vec<Detection> = response
            .json()
            .await
            .map_err(|e| Error::Detection(format!("invalid inference response: {e}")))?;

        tracing::trace!(camera = %frame.camera, count = detections.len(), "detections received");
        Ok(detections.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use axum::{Json, Router, body::Bytes, http::StatusCode, routing::post};

    use super::*;
    use crate::session::CameraId;

    async fn spawn_inference(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });
        format!("http://{addr}/detect")
    }

    fn frame() -> Frame {
        Frame::new(CameraId::new(0), image::RgbImage::from_pixel(16, 16, image::Rgb([90, 90, 90])))
    }

    #[tokio::test]
    async fn parses_scores() {
        let app = Router::new().route(
            "/detect",
            post(|body: Bytes| async move {
                // JPEG SOI marker
                assert_eq!(&body[..2], &[0xFF, 0xD8]);
                Json(vec![
                    Detection { label: "scooter".into(), score: 0.91 },
                    Detection { label: "person".into(), score: 0.3 },
                ])
            }),
        );
        let url = spawn_inference(app).await;
        let detector = HttpDetector::new(url, Duration::from_secs(2), 80).unwrap();

        let detections = detector.detect(&frame()).await.unwrap();
        assert_eq!(detections.score("scooter"), Some(0.91));
        assert_eq!(detections.len(), 2);
    }

    #[tokio::test]
    async fn server_error_is_detection_error() {
        let app = Router::new().route("/detect", post(|| async { StatusCode::BAD_GATEWAY }));
        let url = spawn_inference(app).await;
        let detector = HttpDetector::new(url, Duration::from_secs(2), 80).unwrap();

        assert!(matches!(detector.detect(&frame()).await, Err(Error::Detection(_))));
    }
}

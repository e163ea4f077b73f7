//! Session completion notifications
//!
//! Publishes the outbound `complete` message once per finished session.
//! Delivery is best-effort: failures are logged and never turn into a second
//! notification.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::{Error, Result};

/// Outbound completion message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionNotice {
    /// Always `"complete"`
    pub command: String,
    /// Request id of the finished session
    pub request_id: String,
    /// Always `"success"`
    pub status: String,
    /// RFC 3339 completion time
    pub completed_at: String,
}

impl CompletionNotice {
    /// Build a success notice for `request_id`
    #[must_use]
    pub fn success(request_id: &str) -> Self {
        Self {
            command: "complete".to_string(),
            request_id: request_id.to_string(),
            status: "success".to_string(),
            completed_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Sink for completion notices
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a completion notice
    ///
    /// # Errors
    ///
    /// Returns error if delivery fails
    async fn notify(&self, notice: &CompletionNotice) -> Result<()>;
}

/// Notifier that only logs
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notice: &CompletionNotice) -> Result<()> {
        tracing::info!(request_id = %notice.request_id, "session complete (no webhook configured)");
        Ok(())
    }
}

/// Notifier that POSTs the notice as JSON to a webhook
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    /// Create a webhook notifier
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Notify(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notice: &CompletionNotice) -> Result<()> {
        let response = self.client.post(&self.url).json(notice).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Notify(format!("webhook returned {status}: {body}")));
        }

        tracing::debug!(url = %self.url, request_id = %notice.request_id, "completion delivered");
        Ok(())
    }
}

/// Delivers completion notices and remembers the latest one for `/status`
#[derive(Clone)]
pub struct CompletionPublisher {
    notifier: Arc<dyn Notifier>,
    latest: Arc<watch::Sender<Option<CompletionNotice>>>,
}

impl CompletionPublisher {
    /// Create a publisher around `notifier`
    #[must_use]
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        let (latest, _) = watch::channel(None);
        Self {
            notifier,
            latest: Arc::new(latest),
        }
    }

    /// Watch the most recent completion
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<CompletionNotice>> {
        self.latest.subscribe()
    }

    /// Publish a notice (best-effort)
    pub async fn publish(&self, notice: CompletionNotice) {
        if let Err(e) = self.notifier.notify(&notice).await {
            tracing::warn!(
                request_id = %notice.request_id,
                error = %e,
                "failed to deliver completion notice"
            );
        }
        self.latest.send_replace(Some(notice));
    }
}

impl std::fmt::Debug for CompletionPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionPublisher")
            .field("watchers", &self.latest.receiver_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use axum::{Json, Router, http::StatusCode, routing::post};
    use tokio::sync::mpsc;

    use super::*;

    #[test]
    fn success_notice_has_wire_shape() {
        let notice = CompletionNotice::success("req-9");
        let json = serde_json::to_value(&notice).unwrap();
        assert_eq!(json["command"], "complete");
        assert_eq!(json["requestId"], "req-9");
        assert_eq!(json["status"], "success");
        assert!(json["completedAt"].is_string());
    }

    async fn spawn_webhook(status: StatusCode) -> (String, mpsc::Receiver<CompletionNotice>) {
        let (tx, rx) = mpsc::channel(4);
        let app = Router::new().route(
            "/complete",
            post(move |Json(notice): Json<CompletionNotice>| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(notice).await;
                    status
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });
        (format!("http://{addr}/complete"), rx)
    }

    #[tokio::test]
    async fn webhook_posts_notice() {
        let (url, mut rx) = spawn_webhook(StatusCode::OK).await;
        let notifier = WebhookNotifier::new(url, Duration::from_secs(2)).unwrap();

        notifier.notify(&CompletionNotice::success("req-1")).await.unwrap();
        let received = rx.recv().await.unwrap();
        assert_eq!(received.request_id, "req-1");
    }

    #[tokio::test]
    async fn webhook_error_status_is_error() {
        let (url, _rx) = spawn_webhook(StatusCode::INTERNAL_SERVER_ERROR).await;
        let notifier = WebhookNotifier::new(url, Duration::from_secs(2)).unwrap();

        let result = notifier.notify(&CompletionNotice::success("req-1")).await;
        assert!(matches!(result, Err(Error::Notify(_))));
    }

    #[tokio::test]
    async fn publisher_records_latest_even_when_delivery_fails() {
        let notifier =
            WebhookNotifier::new("http://127.0.0.1:9/complete", Duration::from_millis(200))
                .unwrap();
        let publisher = CompletionPublisher::new(Arc::new(notifier));
        let mut latest = publisher.subscribe();
        assert!(latest.borrow().is_none());

        publisher.publish(CompletionNotice::success("req-2")).await;
        assert!(latest.has_changed().unwrap());
        assert_eq!(latest.borrow_and_update().as_ref().unwrap().request_id, "req-2");
    }
}

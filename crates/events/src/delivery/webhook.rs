//! Webhook delivery with exponential-backoff retry.
//!
//! [`WebhookNotificationSink`] sends a JSON-encoded [`Notification`] to an
//! external URL via HTTP POST. Failed attempts are retried three times with
//! exponential backoff (1 s, 2 s, 4 s) before the notification is dropped.

use std::time::Duration;

use async_trait::async_trait;
use plangen_core::types::DbId;

use crate::{Notification, NotificationSink};

/// Retry delays (exponential backoff: 1s, 2s, 4s).
const RETRY_DELAYS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
];

/// HTTP request timeout for a single delivery attempt.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Error type for webhook delivery failures.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// The underlying HTTP request failed (network, DNS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The remote server returned a non-2xx status code.
    #[error("Webhook returned HTTP {0}")]
    HttpStatus(u16),
}

// ---------------------------------------------------------------------------
// WebhookNotificationSink
// ---------------------------------------------------------------------------

/// Delivers task notifications to one webhook endpoint.
pub struct WebhookNotificationSink {
    client: reqwest::Client,
    url: String,
    retry_delays: Vec<Duration>,
}

impl WebhookNotificationSink {
    /// Create a sink for `url` with a pre-configured HTTP client.
    pub fn new(url: impl Into<String>) -> Result<Self, WebhookError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
            retry_delays: RETRY_DELAYS.to_vec(),
        })
    }

    /// Override the backoff schedule. One retry per entry.
    pub fn with_retry_delays(mut self, delays: Vec<Duration>) -> Self {
        self.retry_delays = delays;
        self
    }

    /// Deliver a notification with retry.
    ///
    /// Returns `Ok(())` on the first successful attempt, or the last error
    /// once every retry is exhausted.
    pub async fn deliver(&self, notification: &Notification) -> Result<(), WebhookError> {
        let url = self.url.as_str();

        for (attempt, delay) in self.retry_delays.iter().enumerate() {
            match self.try_send(notification).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        url,
                        error = %e,
                        "Webhook delivery attempt failed, retrying"
                    );
                    tokio::time::sleep(*delay).await;
                }
            }
        }

        // Final attempt after the last backoff.
        self.try_send(notification).await.inspect_err(|e| {
            tracing::error!(url, error = %e, "Webhook delivery failed after all retries");
        })
    }

    /// Execute a single POST request and check the response status.
    async fn try_send(&self, notification: &Notification) -> Result<(), WebhookError> {
        let response = self.client.post(&self.url).json(notification).send().await?;
        if !response.status().is_success() {
            return Err(WebhookError::HttpStatus(response.status().as_u16()));
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationSink for WebhookNotificationSink {
    async fn notify_success(&self, owner_id: DbId, artifact_path: &str, label: &str) {
        let _ = self
            .deliver(&Notification::success(owner_id, artifact_path, label))
            .await;
    }

    async fn notify_failure(&self, owner_id: DbId, message: &str) {
        let _ = self
            .deliver(&Notification::failure(owner_id, message))
            .await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    use super::*;

    /// Minimal HTTP endpoint: answers 500 to the first `failures` requests,
    /// 200 afterwards, and records every request body.
    struct TestEndpoint {
        url: String,
        hits: Arc<AtomicUsize>,
        bodies: Arc<Mutex<Vec<serde_json::Value>>>,
    }

    async fn spawn_endpoint(failures: usize) -> TestEndpoint {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/hook", listener.local_addr().unwrap());
        let hits = Arc::new(AtomicUsize::new(0));
        let bodies = Arc::new(Mutex::new(Vec::new()));

        let (h, b) = (Arc::clone(&hits), Arc::clone(&bodies));
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let n = h.fetch_add(1, Ordering::SeqCst);
                let status = if n < failures {
                    "500 Internal Server Error"
                } else {
                    "200 OK"
                };
                handle(stream, status, Arc::clone(&b)).await;
            }
        });

        TestEndpoint { url, hits, bodies }
    }

    async fn handle(
        mut stream: TcpStream,
        status: &str,
        bodies: Arc<Mutex<Vec<serde_json::Value>>>,
    ) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        let header_end = loop {
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };

        let headers = String::from_utf8_lossy(&buf[..header_end]).to_ascii_lowercase();
        let content_length: usize = headers
            .lines()
            .find_map(|l| l.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0);
        while buf.len() < header_end + content_length {
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }

        if let Ok(body) = serde_json::from_slice(&buf[header_end..]) {
            bodies.lock().unwrap().push(body);
        }
        let response =
            format!("HTTP/1.1 {status}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
        stream.write_all(response.as_bytes()).await.unwrap();
        stream.shutdown().await.ok();
    }

    fn no_wait() -> Vec<Duration> {
        vec![Duration::ZERO; 3]
    }

    #[test]
    fn webhook_error_display_http_status() {
        let err = WebhookError::HttpStatus(502);
        assert_eq!(err.to_string(), "Webhook returned HTTP 502");
    }

    #[tokio::test]
    async fn delivers_on_first_attempt() {
        let endpoint = spawn_endpoint(0).await;
        let sink = WebhookNotificationSink::new(&endpoint.url)
            .unwrap()
            .with_retry_delays(no_wait());

        sink.notify_success(5, "/tasks/9/report", "a shed").await;

        assert_eq!(endpoint.hits.load(Ordering::SeqCst), 1);
        let bodies = endpoint.bodies.lock().unwrap();
        assert_eq!(bodies[0]["kind"], "task_completed");
        assert_eq!(bodies[0]["owner_id"], 5);
        assert_eq!(bodies[0]["artifact_path"], "/tasks/9/report");
    }

    #[tokio::test]
    async fn retries_until_success() {
        let endpoint = spawn_endpoint(2).await;
        let sink = WebhookNotificationSink::new(&endpoint.url)
            .unwrap()
            .with_retry_delays(no_wait());

        let result = sink.deliver(&Notification::failure(5, "boom")).await;

        assert!(result.is_ok());
        assert_eq!(endpoint.hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_all_retries() {
        let endpoint = spawn_endpoint(usize::MAX).await;
        let sink = WebhookNotificationSink::new(&endpoint.url)
            .unwrap()
            .with_retry_delays(no_wait());

        let result = sink.deliver(&Notification::failure(5, "boom")).await;
        assert!(matches!(result, Err(WebhookError::HttpStatus(500))));
        assert_eq!(endpoint.hits.load(Ordering::SeqCst), 4);

        // Through the sink interface the failure is swallowed.
        sink.notify_failure(5, "boom").await;
        assert_eq!(endpoint.hits.load(Ordering::SeqCst), 8);
    }
}

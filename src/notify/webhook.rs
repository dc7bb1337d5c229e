//! HTTP webhook delivery with exponential backoff.

use super::{Notification, Notifier, NotifyError};
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
    url: String,
    max_elapsed: Duration,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
            max_elapsed: Duration::from_secs(30),
        }
    }

    /// Cap on total retry time per notification.
    pub fn with_max_elapsed(mut self, max_elapsed: Duration) -> Self {
        self.max_elapsed = max_elapsed;
        self
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(self.max_elapsed),
            ..Default::default()
        };

        retry(backoff, || async {
            let response = self
                .client
                .post(&self.url)
                .json(notification)
                .send()
                .await
                .map_err(|e| backoff::Error::transient(NotifyError::Network(e.to_string())))?;

            let status = response.status();
            if status == 429 || status.is_server_error() {
                return Err(backoff::Error::transient(NotifyError::Http {
                    status: status.as_u16(),
                    message: "Server error".to_string(),
                }));
            }
            if !status.is_success() {
                return Err(backoff::Error::permanent(NotifyError::Http {
                    status: status.as_u16(),
                    message: "Client error".to_string(),
                }));
            }

            debug!(user = %notification.user_id(), "Webhook delivered");
            Ok(())
        })
        .await
    }
}

//! Best-effort member notifications.
//!
//! Engines hand notifications to [`dispatch`], which delivers them on a
//! background task after the state change has committed. A slow or failing
//! notifier never holds up the caller and never rolls anything back.

use crate::domain::{Decimal, PurchaseId, RankId, RebateId, UserId};
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub mod webhook;

pub use webhook::WebhookNotifier;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum Notification {
    #[serde(rename_all = "camelCase")]
    RebateCredited {
        user_id: UserId,
        rebate_id: RebateId,
        purchase_id: PurchaseId,
        level: i64,
        amount: Decimal,
    },
    #[serde(rename_all = "camelCase")]
    RankAdvanced {
        user_id: UserId,
        previous_rank_id: Option<RankId>,
        new_rank_id: RankId,
        rank_name: String,
    },
}

impl Notification {
    pub fn user_id(&self) -> &UserId {
        match self {
            Notification::RebateCredited { user_id, .. } => user_id,
            Notification::RankAdvanced { user_id, .. } => user_id,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum NotifyError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("HTTP error {status}: {message}")]
    Http { status: u16, message: String },
    #[error("Notification rejected: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait Notifier: Send + Sync + fmt::Debug {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Deliver `notifications` in order on a background task.
///
/// Returns None when there is nothing to send. Failures are logged per
/// notification and otherwise dropped.
pub fn dispatch(
    notifier: &Arc<dyn Notifier>,
    notifications: Vec<Notification>,
) -> Option<JoinHandle<()>> {
    if notifications.is_empty() {
        return None;
    }
    let notifier = Arc::clone(notifier);
    Some(tokio::spawn(async move {
        for notification in notifications {
            if let Err(e) = notifier.notify(&notification).await {
                warn!(user = %notification.user_id(), error = %e, "Notification delivery failed");
            }
        }
    }))
}

/// Writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        info!(user = %notification.user_id(), ?notification, "Notification");
        Ok(())
    }
}

/// Records notifications in memory; optionally rejects every delivery or
/// stalls before each one.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    sent: Mutex<Vec<Notification>>,
    fail: bool,
    delay: Option<Duration>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// A notifier whose deliveries always fail.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// A notifier that waits `delay` before recording each delivery.
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }

    /// Wait until at least `count` notifications arrived or `timeout` passed,
    /// then return what was recorded.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<Notification> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let sent = self.sent();
            if sent.len() >= count || tokio::time::Instant::now() >= deadline {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(NotifyError::Rejected("delivery disabled".to_string()));
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(notification.clone());
        }
        Ok(())
    }
}

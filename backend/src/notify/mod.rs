//! Push notifications.
//!
//! [`Notifier`] is fire-and-forget: it filters malformed device tokens,
//! batches the rest and hands them to a [`PushGateway`]. Failures are logged
//! and never reach the caller.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use crate::errors::AppError;

/// Largest number of tokens sent to the gateway in one call.
pub const MAX_BATCH_SIZE: usize = 100;

/// Delivery outcome for one device token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryStatus {
    Delivered,
    Failed(String),
    Skipped(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub token: String,
    pub status: DeliveryStatus,
}

/// Push delivery service.
#[async_trait]
pub trait PushGateway: Send + Sync {
    async fn send_batch(
        &self,
        title: &str,
        body: &str,
        tokens: &[String],
    ) -> Result<Vec<DeliveryReceipt>, AppError>;
}

/// Whether `token` looks like an Expo push token.
pub fn is_push_token(token: &str) -> bool {
    ["ExponentPushToken[", "ExpoPushToken["].iter().any(|prefix| {
        token
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_suffix(']'))
            .is_some_and(|inner| !inner.is_empty())
    })
}

#[derive(Clone)]
pub struct Notifier {
    gateway: Arc<dyn PushGateway>,
}

impl Notifier {
    pub fn new(gateway: Arc<dyn PushGateway>) -> Self {
        Self { gateway }
    }

    /// Send one message to every valid token and collect the receipts.
    pub async fn send(&self, title: &str, body: &str, tokens: &[String]) -> Vec<DeliveryReceipt> {
        let mut receipts = Vec::with_capacity(tokens.len());
        let mut valid = Vec::new();
        for token in tokens {
            if is_push_token(token) {
                valid.push(token.clone());
            } else {
                tracing::warn!(token = %token, "Skipping malformed push token");
                receipts.push(DeliveryReceipt {
                    token: token.clone(),
                    status: DeliveryStatus::Skipped("not a valid push token".to_string()),
                });
            }
        }

        for batch in valid.chunks(MAX_BATCH_SIZE) {
            match self.gateway.send_batch(title, body, batch).await {
                Ok(batch_receipts) => {
                    for receipt in &batch_receipts {
                        if let DeliveryStatus::Failed(reason) = &receipt.status {
                            tracing::warn!(token = %receipt.token, reason = %reason, "Push delivery failed");
                        }
                    }
                    receipts.extend(batch_receipts);
                }
                Err(e) => {
                    tracing::error!(error = %e, batch_size = batch.len(), "Push batch failed");
                    receipts.extend(batch.iter().map(|token| DeliveryReceipt {
                        token: token.clone(),
                        status: DeliveryStatus::Failed(e.message().to_string()),
                    }));
                }
            }
        }
        receipts
    }

    /// Send in the background. Nothing is sent when `tokens` is empty.
    pub fn dispatch(&self, title: String, body: String, tokens: Vec<String>) -> JoinHandle<()> {
        self.dispatch_to(title, body, async move { Ok(tokens) })
    }

    /// Resolve the recipients and send, both in the background. A failed
    /// lookup is logged and nothing is sent.
    pub fn dispatch_to<R>(&self, title: String, body: String, recipients: R) -> JoinHandle<()>
    where
        R: Future<Output = Result<Vec<String>, AppError>> + Send + 'static,
    {
        let notifier = self.clone();
        tokio::spawn(async move {
            let tokens = match recipients.await {
                Ok(tokens) => tokens,
                Err(e) => {
                    tracing::warn!(title = %title, error = %e, "Could not resolve push recipients");
                    return;
                }
            };
            if tokens.is_empty() {
                tracing::debug!(title = %title, "No push tokens to notify");
                return;
            }
            let receipts = notifier.send(&title, &body, &tokens).await;
            let delivered = receipts
                .iter()
                .filter(|r| r.status == DeliveryStatus::Delivered)
                .count();
            tracing::info!(title = %title, delivered, total = receipts.len(), "Push notification sent");
        })
    }
}

/// Gateway that only logs messages.
#[derive(Debug, Clone, Default)]
pub struct LogPushGateway;

#[async_trait]
impl PushGateway for LogPushGateway {
    async fn send_batch(
        &self,
        title: &str,
        body: &str,
        tokens: &[String],
    ) -> Result<Vec<DeliveryReceipt>, AppError> {
        tracing::info!(title, body, recipients = tokens.len(), "Push notification");
        Ok(tokens
            .iter()
            .map(|token| DeliveryReceipt {
                token: token.clone(),
                status: DeliveryStatus::Delivered,
            })
            .collect())
    }
}

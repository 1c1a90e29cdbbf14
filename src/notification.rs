//! Notification capability
//!
//! Delivery is an external collaborator; the default implementation writes
//! notifications to the structured log. Senders treat delivery as best
//! effort and never fail the surrounding operation.

use async_trait::async_trait;
use uuid::Uuid;

/// Notification kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    P2pTransfer,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::P2pTransfer => "p2p_transfer",
        }
    }
}

/// Notification payload.
#[derive(Debug, Clone)]
pub struct Message {
    pub kind: NotificationKind,
    /// Recipient user id.
    pub destination: Uuid,
    pub body: String,
}

#[derive(Debug, thiserror::Error)]
#[error("notification delivery failed: {0}")]
pub struct NotifyError(pub String);

/// Delivers notifications to downstream systems.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: Message) -> Result<(), NotifyError>;
}

/// Stub notifier that writes notifications to the log.
#[derive(Debug, Clone, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn send(&self, message: Message) -> Result<(), NotifyError> {
        tracing::info!(
            kind = message.kind.as_str(),
            destination = %message.destination,
            body = %message.body,
            "notification"
        );
        Ok(())
    }
}

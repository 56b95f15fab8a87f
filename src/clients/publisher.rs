use async_trait::async_trait;

use crate::{
    error::PublishError,
    models::notification::{NotificationType, QueueMessage},
};

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publishes a persistent message routed by `notification_type`.
    ///
    /// Returns only after the broker has confirmed the message.
    async fn publish(
        &self,
        notification_type: NotificationType,
        message: &QueueMessage,
    ) -> Result<(), PublishError>;
}

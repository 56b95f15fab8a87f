use std::time::Duration;

use async_trait::async_trait;

use crate::{
    error::StoreError,
    models::{notification::NotificationType, status::NotificationStatus},
};

pub const IDEMPOTENCY_SENTINEL: &str = "processed";

pub fn idempotency_key(request_id: &str) -> String {
    format!("idempotency:{}", request_id)
}

pub fn status_key(notification_type: NotificationType, notification_id: &str) -> String {
    format!("notification_status:{}:{}", notification_type, notification_id)
}

/// Shared key-value store backing idempotency claims and status records.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Atomically sets the idempotency key if absent.
    ///
    /// Returns `true` when this caller created the key and `false` when it
    /// already existed. Must be a single round trip.
    async fn claim_idempotency_key(&self, request_id: &str, ttl: Duration)
    -> Result<bool, StoreError>;

    async fn release_idempotency_key(&self, request_id: &str) -> Result<(), StoreError>;

    /// Replaces any previous record for the same (type, id) pair.
    async fn put_status(&self, status: &NotificationStatus, ttl: Duration)
    -> Result<(), StoreError>;

    async fn get_status(
        &self,
        notification_type: NotificationType,
        notification_id: &str,
    ) -> Result<Option<NotificationStatus>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use async_trait::async_trait;

use crate::{
    clients::store::{NotificationStore, idempotency_key, status_key},
    error::StoreError,
    models::{notification::NotificationType, status::NotificationStatus},
};

#[derive(Debug)]
enum Entry {
    Sentinel,
    Status(NotificationStatus),
}

/// Store kept in process memory, with per-key expiry.
///
/// Suitable for tests and single-process development runs only: nothing is
/// shared between processes.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: Mutex<HashMap<String, (Entry, Instant)>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, (Entry, Instant)>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn purge_expired(entries: &mut HashMap<String, (Entry, Instant)>) {
        let now = Instant::now();
        entries.retain(|_, (_, expires_at)| *expires_at > now);
    }
}

#[async_trait]
impl NotificationStore for InMemoryStore {
    async fn claim_idempotency_key(
        &self,
        request_id: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut entries = self.lock();
        Self::purge_expired(&mut entries);

        let key = idempotency_key(request_id);
        if entries.contains_key(&key) {
            return Ok(false);
        }

        entries.insert(key, (Entry::Sentinel, Instant::now() + ttl));
        Ok(true)
    }

    async fn release_idempotency_key(&self, request_id: &str) -> Result<(), StoreError> {
        self.lock().remove(&idempotency_key(request_id));
        Ok(())
    }

    async fn put_status(
        &self,
        status: &NotificationStatus,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let key = status_key(status.notification_type, &status.notification_id);
        self.lock()
            .insert(key, (Entry::Status(status.clone()), Instant::now() + ttl));
        Ok(())
    }

    async fn get_status(
        &self,
        notification_type: NotificationType,
        notification_id: &str,
    ) -> Result<Option<NotificationStatus>, StoreError> {
        let mut entries = self.lock();
        Self::purge_expired(&mut entries);

        match entries.get(&status_key(notification_type, notification_id)) {
            Some((Entry::Status(status), _)) => Ok(Some(status.clone())),
            _ => Ok(None),
        }
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

use std::{collections::HashMap, time::Duration};

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::{AsyncCommands, Client, aio::MultiplexedConnection};
use tracing::{debug, info};

use crate::{
    clients::store::{IDEMPOTENCY_SENTINEL, NotificationStore, idempotency_key, status_key},
    error::StoreError,
    models::{
        notification::NotificationType,
        status::{DeliveryStatus, NotificationStatus},
    },
};

#[derive(Clone)]
pub struct RedisStore {
    connection: MultiplexedConnection,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> Result<Self, Error> {
        info!("Connecting to Redis");

        let client =
            Client::open(redis_url).map_err(|e| anyhow!("Failed to create redis client: {}", e))?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| anyhow!("Failed to connect to redis: {}", e))?;

        info!("Redis connection established");

        Ok(Self { connection })
    }
}

fn ttl_seconds(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

fn decode_status(
    key: &str,
    mut fields: HashMap<String, String>,
) -> Result<NotificationStatus, StoreError> {
    let corrupt = |reason: String| StoreError::Corrupt {
        key: key.to_string(),
        reason,
    };

    let notification_id = fields
        .remove("notification_id")
        .ok_or_else(|| corrupt("missing notification_id".to_string()))?;
    let notification_type = fields
        .remove("notification_type")
        .ok_or_else(|| corrupt("missing notification_type".to_string()))?
        .parse::<NotificationType>()
        .map_err(corrupt)?;
    let status = fields
        .remove("status")
        .ok_or_else(|| corrupt("missing status".to_string()))?
        .parse::<DeliveryStatus>()
        .map_err(corrupt)?;
    let timestamp = fields
        .remove("timestamp")
        .ok_or_else(|| corrupt("missing timestamp".to_string()))
        .and_then(|raw| {
            DateTime::parse_from_rfc3339(&raw).map_err(|e| corrupt(format!("bad timestamp: {}", e)))
        })?
        .with_timezone(&Utc);

    Ok(NotificationStatus {
        notification_id,
        notification_type,
        status,
        timestamp,
        error: fields.remove("error"),
    })
}

#[async_trait]
impl NotificationStore for RedisStore {
    async fn claim_idempotency_key(
        &self,
        request_id: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let key = idempotency_key(request_id);
        let mut conn = self.connection.clone();

        let reply: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(IDEMPOTENCY_SENTINEL)
            .arg("NX")
            .arg("EX")
            .arg(ttl_seconds(ttl))
            .query_async(&mut conn)
            .await?;

        let claimed = reply.is_some();
        debug!(key = %key, claimed, "Idempotency key checked");

        Ok(claimed)
    }

    async fn release_idempotency_key(&self, request_id: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        conn.del::<_, ()>(idempotency_key(request_id)).await?;
        Ok(())
    }

    async fn put_status(
        &self,
        status: &NotificationStatus,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let key = status_key(status.notification_type, &status.notification_id);
        let mut conn = self.connection.clone();

        let mut fields = vec![
            ("notification_id", status.notification_id.clone()),
            ("notification_type", status.notification_type.to_string()),
            ("status", status.status.to_string()),
            ("timestamp", status.timestamp.to_rfc3339()),
        ];
        if let Some(error) = &status.error {
            fields.push(("error", error.clone()));
        }

        redis::pipe()
            .atomic()
            .del(&key)
            .ignore()
            .hset_multiple(&key, &fields[..])
            .ignore()
            .expire(&key, ttl_seconds(ttl) as i64)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        debug!(key = %key, status = %status.status, "Notification status written");

        Ok(())
    }

    async fn get_status(
        &self,
        notification_type: NotificationType,
        notification_id: &str,
    ) -> Result<Option<NotificationStatus>, StoreError> {
        let key = status_key(notification_type, notification_id);
        let mut conn = self.connection.clone();

        let fields: HashMap<String, String> = conn.hgetall(&key).await?;
        if fields.is_empty() {
            return Ok(None);
        }

        decode_status(&key, fields).map(Some)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

use std::{sync::Arc, time::Duration};

use serde_json::{Map, Value};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    clients::{publisher::Publisher, store::NotificationStore},
    config::Config,
    error::{GatewayError, GatewayResult},
    models::{
        notification::{NotificationRequest, NotificationType, SubmitNotification, SubmitOutcome},
        status::{DeliveryStatus, NotificationStatus, StatusUpdate},
        validation::{validate_request_id, validate_template_code, validate_user_id},
    },
};

#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub idempotency_ttl: Duration,
    pub status_ttl: Duration,
    /// Deletes the idempotency key again when publishing fails, so the caller
    /// can retry with the same request id. Off by default.
    pub release_key_on_publish_failure: bool,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            idempotency_ttl: Duration::from_secs(3600),
            status_ttl: Duration::from_secs(86400),
            release_key_on_publish_failure: false,
        }
    }
}

impl GatewaySettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            idempotency_ttl: config.idempotency_ttl(),
            status_ttl: config.status_ttl(),
            release_key_on_publish_failure: config.release_idempotency_key_on_publish_failure,
        }
    }
}

/// Intake side of the pipeline: validation, deduplication, publishing and
/// the status read/write contract.
pub struct Gateway {
    store: Arc<dyn NotificationStore>,
    publisher: Arc<dyn Publisher>,
    settings: GatewaySettings,
}

impl Gateway {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        publisher: Arc<dyn Publisher>,
        settings: GatewaySettings,
    ) -> Self {
        Self {
            store,
            publisher,
            settings,
        }
    }

    pub async fn submit(&self, submission: SubmitNotification) -> GatewayResult<SubmitOutcome> {
        let request = validate_submission(submission)?;

        let claimed = self
            .store
            .claim_idempotency_key(&request.request_id, self.settings.idempotency_ttl)
            .await?;

        if !claimed {
            info!(
                request_id = %request.request_id,
                "Duplicate request detected, skipping publish"
            );
            return Ok(SubmitOutcome::Duplicate {
                request_id: request.request_id,
            });
        }

        // Pending goes in before the publish; a worker may settle the message
        // before the confirm arrives.
        self.record_status(&request, DeliveryStatus::Pending, None)
            .await;

        let message = request.to_queue_message();

        if let Err(e) = self
            .publisher
            .publish(request.notification_type, &message)
            .await
        {
            error!(
                request_id = %request.request_id,
                notification_type = %request.notification_type,
                error = %e,
                "Failed to publish notification"
            );

            self.record_status(&request, DeliveryStatus::Failed, Some(e.to_string()))
                .await;

            if self.settings.release_key_on_publish_failure {
                if let Err(release_err) = self
                    .store
                    .release_idempotency_key(&request.request_id)
                    .await
                {
                    warn!(
                        request_id = %request.request_id,
                        error = %release_err,
                        "Failed to release idempotency key after publish failure"
                    );
                }
            }

            return Err(e.into());
        }

        info!(
            request_id = %request.request_id,
            notification_type = %request.notification_type,
            "Notification accepted and queued"
        );

        Ok(SubmitOutcome::Accepted {
            request_id: request.request_id,
        })
    }

    pub async fn update_status(
        &self,
        notification_type: &str,
        update: StatusUpdate,
    ) -> GatewayResult<NotificationStatus> {
        let mut errors = Vec::new();

        let notification_type = notification_type
            .parse::<NotificationType>()
            .map_err(|e| errors.push(e))
            .ok();

        let notification_id = match update.notification_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => Some(id.to_string()),
            _ => {
                errors.push("notification_id is required".to_string());
                None
            }
        };

        let status = match update.status.as_deref() {
            Some(raw) => raw
                .parse::<DeliveryStatus>()
                .map_err(|e| errors.push(e))
                .ok(),
            None => {
                errors.push("status is required".to_string());
                None
            }
        };

        let (Some(notification_type), Some(notification_id), Some(status)) =
            (notification_type, notification_id, status)
        else {
            return Err(GatewayError::Validation(errors));
        };

        let mut record = NotificationStatus::new(notification_type, notification_id, status);
        if let Some(timestamp) = update.timestamp {
            record = record.with_timestamp(timestamp);
        }
        if let Some(error) = update.error {
            record = record.with_error(error);
        }

        self.store.put_status(&record, self.settings.status_ttl).await?;

        info!(
            notification_id = %record.notification_id,
            notification_type = %record.notification_type,
            status = %record.status,
            "Notification status updated"
        );

        Ok(record)
    }

    pub async fn get_status(
        &self,
        notification_type: &str,
        notification_id: Option<&str>,
    ) -> GatewayResult<NotificationStatus> {
        let notification_type = notification_type
            .parse::<NotificationType>()
            .map_err(GatewayError::validation)?;

        let notification_id = notification_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| GatewayError::validation("notification_id is required"))?;

        self.store
            .get_status(notification_type, notification_id)
            .await?
            .ok_or(GatewayError::NotFound)
    }

    async fn record_status(
        &self,
        request: &NotificationRequest,
        status: DeliveryStatus,
        error: Option<String>,
    ) {
        let mut record =
            NotificationStatus::new(request.notification_type, request.request_id.clone(), status);
        if let Some(error) = error {
            record = record.with_error(error);
        }

        if let Err(e) = self.store.put_status(&record, self.settings.status_ttl).await {
            warn!(request_id = %request.request_id, status = %record.status, error = %e, "Failed to record notification status");
        }
    }
}

fn object_field(
    name: &str,
    value: Option<Value>,
    errors: &mut Vec<String>,
) -> Map<String, Value> {
    match value {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map,
        Some(_) => {
            errors.push(format!("{} must be an object of key-value pairs", name));
            Map::new()
        }
    }
}

/// Checks every field and reports all problems at once.
pub fn validate_submission(submission: SubmitNotification) -> GatewayResult<NotificationRequest> {
    let mut errors = Vec::new();

    let notification_type = match submission.notification_type.as_deref() {
        Some(raw) => raw
            .parse::<NotificationType>()
            .map_err(|e| errors.push(e))
            .ok(),
        None => {
            errors.push("notification_type is required".to_string());
            None
        }
    };

    let user_id = match submission.user_id {
        Some(user_id) => match validate_user_id(&user_id) {
            Ok(()) => Some(user_id),
            Err(e) => {
                errors.push(e.to_string());
                None
            }
        },
        None => {
            errors.push("user_id is required".to_string());
            None
        }
    };

    let template_code = match submission.template_code {
        Some(code) => match validate_template_code(&code) {
            Ok(()) => Some(code),
            Err(e) => {
                errors.push(e.to_string());
                None
            }
        },
        None => {
            errors.push("template_code is required".to_string());
            None
        }
    };

    let request_id = match submission.request_id {
        Some(request_id) => match validate_request_id(&request_id) {
            Ok(()) => Some(request_id),
            Err(e) => {
                errors.push(e.to_string());
                None
            }
        },
        None => Some(Uuid::new_v4().to_string()),
    };

    let variables = object_field("variables", submission.variables, &mut errors);
    let metadata = object_field("metadata", submission.metadata, &mut errors);

    match (notification_type, user_id, template_code, request_id) {
        (Some(notification_type), Some(user_id), Some(template_code), Some(request_id))
            if errors.is_empty() =>
        {
            Ok(NotificationRequest {
                request_id,
                user_id,
                notification_type,
                template_code,
                variables,
                priority: submission.priority.unwrap_or(0),
                metadata,
            })
        }
        _ => Err(GatewayError::Validation(errors)),
    }
}

use std::{future::Future, sync::Arc, time::Duration};

use anyhow::{Error, Result, anyhow};
use futures_util::StreamExt;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::{
    clients::{
        circuit_breaker::CircuitBreaker,
        collaborators::{DeliveryProvider, TemplateDirectory, UserDirectory},
        rbmq::RabbitMqClient,
        store::NotificationStore,
        template::render_template,
    },
    config::Config,
    error::DeliveryError,
    models::{
        circuit_breaker::{CircuitBreakerConfig, CircuitState},
        collaborator::UserProfile,
        notification::{NotificationType, QueueMessage},
        retry::RetryConfig,
        status::{DeliveryStatus, NotificationStatus},
        template::RenderedMessage,
        validation::validate_push_token,
    },
    utils::retry_with_backoff,
};

/// Processing stage of the message currently held by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Fetching,
    Rendering,
    Delivering,
}

/// What the worker tells the broker once a message is finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    Requeue,
    DeadLetter,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    Delivered(RenderedMessage),
    /// The user cannot or does not want to receive this channel. Not a failure.
    Filtered(String),
}

/// Transient failures get one more broker attempt; everything else, and any
/// failure on the second attempt, goes to the dead-letter queue.
pub fn disposition_for(error: &DeliveryError, redelivered: bool) -> Disposition {
    match error {
        DeliveryError::Transient { .. } | DeliveryError::CircuitOpen(_) if !redelivered => {
            Disposition::Requeue
        }
        _ => Disposition::DeadLetter,
    }
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub status_ttl: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            status_ttl: Duration::from_secs(86400),
        }
    }
}

impl WorkerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            retry: config.retry_config(),
            circuit_breaker: config.circuit_breaker_config(),
            status_ttl: config.status_ttl(),
        }
    }
}

pub struct DeliveryWorker {
    notification_type: NotificationType,
    users: Arc<dyn UserDirectory>,
    templates: Arc<dyn TemplateDirectory>,
    provider: Arc<dyn DeliveryProvider>,
    store: Arc<dyn NotificationStore>,
    retry_config: RetryConfig,
    status_ttl: Duration,
    user_breaker: CircuitBreaker,
    template_breaker: CircuitBreaker,
    provider_breaker: CircuitBreaker,
}

impl DeliveryWorker {
    pub fn new(
        notification_type: NotificationType,
        users: Arc<dyn UserDirectory>,
        templates: Arc<dyn TemplateDirectory>,
        provider: Arc<dyn DeliveryProvider>,
        store: Arc<dyn NotificationStore>,
        settings: WorkerSettings,
    ) -> Self {
        let provider_breaker =
            CircuitBreaker::new(provider.name(), settings.circuit_breaker.clone());

        Self {
            notification_type,
            users,
            templates,
            provider,
            store,
            retry_config: settings.retry,
            status_ttl: settings.status_ttl,
            user_breaker: CircuitBreaker::new("user_service", settings.circuit_breaker.clone()),
            template_breaker: CircuitBreaker::new("template_service", settings.circuit_breaker),
            provider_breaker,
        }
    }

    pub fn notification_type(&self) -> NotificationType {
        self.notification_type
    }

    pub fn circuit_states(&self) -> Vec<(&str, CircuitState)> {
        [
            &self.user_breaker,
            &self.template_breaker,
            &self.provider_breaker,
        ]
        .into_iter()
        .map(|breaker| (breaker.dependency(), breaker.state()))
        .collect()
    }

    /// Consumes the working queue until `shutdown` resolves or the stream ends.
    ///
    /// A message already taken from the stream is always settled before the
    /// loop checks for shutdown again.
    pub async fn run<S>(&self, broker: &RabbitMqClient, shutdown: S) -> Result<(), Error>
    where
        S: Future<Output = ()>,
    {
        let consumer_tag = format!("{}_worker", self.notification_type);
        let mut consumer = broker
            .create_consumer(self.notification_type, &consumer_tag)
            .await?;

        tokio::pin!(shutdown);

        info!(notification_type = %self.notification_type, "Delivery worker started");

        loop {
            let next = tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, no longer accepting messages");
                    break;
                }
                next = consumer.next() => next,
            };

            let delivery = match next {
                Some(Ok(delivery)) => delivery,
                Some(Err(e)) => return Err(anyhow!("Consumer stream failed: {}", e)),
                None => {
                    warn!("Consumer stream ended");
                    break;
                }
            };

            let disposition = self.handle(&delivery.data, delivery.redelivered).await;

            match disposition {
                Disposition::Ack => broker.acknowledge(delivery.delivery_tag).await?,
                Disposition::Requeue => broker.reject(delivery.delivery_tag, true).await?,
                Disposition::DeadLetter => broker.reject(delivery.delivery_tag, false).await?,
            }
        }

        Ok(())
    }

    /// Processes one raw queue payload and decides how the broker should settle it.
    pub async fn handle(&self, payload: &[u8], redelivered: bool) -> Disposition {
        debug!(stage = ?Stage::Received, redelivered, "Message received");

        let message = match serde_json::from_slice::<QueueMessage>(payload) {
            Ok(message) => message,
            Err(e) => {
                let err = DeliveryError::Malformed(e.to_string());
                error!(error = %err, "Dropping message to dead-letter queue");
                return Disposition::DeadLetter;
            }
        };

        match self.process(&message).await {
            Ok(ProcessOutcome::Delivered(_)) => {
                self.record_status(&message, DeliveryStatus::Delivered, None)
                    .await;
                info!(request_id = %message.request_id, "Notification delivered");
                Disposition::Ack
            }
            Ok(ProcessOutcome::Filtered(reason)) => {
                info!(request_id = %message.request_id, reason = %reason, "Notification filtered");
                self.record_status(
                    &message,
                    DeliveryStatus::Failed,
                    Some(format!("filtered: {}", reason)),
                )
                .await;
                Disposition::Ack
            }
            Err(e) => {
                let disposition = disposition_for(&e, redelivered);

                match disposition {
                    Disposition::Requeue => {
                        warn!(request_id = %message.request_id, error = %e, "Message requeued for retry");
                        self.record_status(&message, DeliveryStatus::Pending, Some(e.to_string()))
                            .await;
                    }
                    _ => {
                        error!(request_id = %message.request_id, error = %e, redelivered, "Message moved to DLQ");
                        self.record_status(&message, DeliveryStatus::Failed, Some(e.to_string()))
                            .await;
                    }
                }

                disposition
            }
        }
    }

    pub async fn process(&self, message: &QueueMessage) -> Result<ProcessOutcome, DeliveryError> {
        debug!(
            stage = ?Stage::Fetching,
            request_id = %message.request_id,
            user_id = %message.user_id,
            template_code = %message.template_code,
            "Fetching user and template"
        );

        let user = self
            .user_breaker
            .call(|| {
                retry_with_backoff(&self.retry_config, || {
                    self.users.fetch_user(&message.user_id)
                })
            })
            .await?;

        let recipient = match self.recipient_for(&user) {
            Ok(recipient) => recipient,
            Err(reason) => return Ok(ProcessOutcome::Filtered(reason)),
        };

        let template = self
            .template_breaker
            .call(|| {
                retry_with_backoff(&self.retry_config, || {
                    self.templates
                        .fetch_template(&message.template_code, &user.language)
                })
            })
            .await?;

        if template.notification_type != self.notification_type {
            return Err(DeliveryError::Permanent(format!(
                "template {} is a {} template, not {}",
                message.template_code, template.notification_type, self.notification_type
            )));
        }

        if self.notification_type == NotificationType::Push {
            validate_push_token(&recipient)
                .map_err(|e| DeliveryError::Permanent(format!("invalid push token: {}", e)))?;
        }

        debug!(stage = ?Stage::Rendering, request_id = %message.request_id, "Rendering template");
        let rendered = render_template(&template, &merged_variables(&user, &message.variables));

        debug!(stage = ?Stage::Delivering, request_id = %message.request_id, "Delivering notification");
        self.provider_breaker
            .call(|| self.provider.deliver(&recipient, &rendered, message))
            .await?;

        Ok(ProcessOutcome::Delivered(rendered))
    }

    fn recipient_for(&self, user: &UserProfile) -> Result<String, String> {
        let (opted_in, address, missing) = match self.notification_type {
            NotificationType::Email => (user.prefers_email, &user.email, "email address"),
            NotificationType::Push => (user.prefers_push, &user.push_token, "push token"),
        };

        if !opted_in {
            return Err(format!("user opted out of {} notifications", self.notification_type));
        }

        match address.as_deref().map(str::trim) {
            Some(address) if !address.is_empty() => Ok(address.to_string()),
            _ => Err(format!("user has no {}", missing)),
        }
    }

    async fn record_status(
        &self,
        message: &QueueMessage,
        status: DeliveryStatus,
        error: Option<String>,
    ) {
        let mut record =
            NotificationStatus::new(self.notification_type, message.request_id.clone(), status);
        if let Some(error) = error {
            record = record.with_error(error);
        }

        if let Err(e) = self.store.put_status(&record, self.status_ttl).await {
            warn!(request_id = %message.request_id, error = %e, "Failed to record notification status");
        }
    }
}

/// The user's full name is offered as `name`; request variables take precedence.
fn merged_variables(user: &UserProfile, variables: &Map<String, Value>) -> Map<String, Value> {
    let mut merged = Map::new();

    let full_name = user.full_name();
    if !full_name.is_empty() {
        merged.insert("name".to_string(), Value::String(full_name));
    }

    merged.extend(variables.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

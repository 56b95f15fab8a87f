use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use notification_dispatch::{
    clients::{
        collaborators::{DeliveryProvider, TemplateDirectory, UserDirectory},
        memory::InMemoryStore,
        publisher::Publisher,
        store::NotificationStore,
    },
    error::{DeliveryError, PublishError},
    gateway::{Gateway, GatewaySettings},
    models::{
        circuit_breaker::CircuitBreakerConfig,
        collaborator::UserProfile,
        notification::{NotificationType, QueueMessage, SubmitNotification},
        retry::RetryConfig,
        template::{RenderedMessage, Template},
    },
    worker::{DeliveryWorker, WorkerSettings},
};
use serde_json::{Value, json};

pub const ANN_ID: &str = "7c9e6679-7425-40de-944b-e07fc1f90ae7";
pub const BOB_ID: &str = "16fd2706-8baf-433b-82eb-8c7fada847da";
pub const VALID_PUSH_TOKEN: &str = "fcm_token:abcdefghijklmnopqrstuvwxyz0123456789";

/// Captures every published message instead of talking to a broker.
#[derive(Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<(NotificationType, QueueMessage)>>,
    failing: AtomicBool,
}

impl RecordingPublisher {
    pub fn failing() -> Self {
        let publisher = Self::default();
        publisher.set_failing(true);
        publisher
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<(NotificationType, QueueMessage)> {
        self.published.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.published.lock().unwrap().len()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(
        &self,
        notification_type: NotificationType,
        message: &QueueMessage,
    ) -> Result<(), PublishError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PublishError::Connection("broker unreachable".to_string()));
        }

        self.published
            .lock()
            .unwrap()
            .push((notification_type, message.clone()));
        Ok(())
    }
}

#[derive(Default)]
pub struct StaticUsers {
    users: HashMap<String, UserProfile>,
}

impl StaticUsers {
    pub fn with(mut self, user_id: &str, user: UserProfile) -> Self {
        self.users.insert(user_id.to_string(), user);
        self
    }
}

#[async_trait]
impl UserDirectory for StaticUsers {
    async fn fetch_user(&self, user_id: &str) -> Result<UserProfile, DeliveryError> {
        self.users
            .get(user_id)
            .cloned()
            .ok_or_else(|| DeliveryError::Permanent(format!("user {} not found", user_id)))
    }
}

/// User directory that is always down.
#[derive(Default)]
pub struct UnavailableUsers {
    pub calls: AtomicU32,
}

#[async_trait]
impl UserDirectory for UnavailableUsers {
    async fn fetch_user(&self, _user_id: &str) -> Result<UserProfile, DeliveryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(DeliveryError::transient("user_service", "connection refused"))
    }
}

#[derive(Default)]
pub struct StaticTemplates {
    templates: HashMap<String, Template>,
}

impl StaticTemplates {
    pub fn with(mut self, code: &str, template: Template) -> Self {
        self.templates.insert(code.to_string(), template);
        self
    }
}

#[async_trait]
impl TemplateDirectory for StaticTemplates {
    async fn fetch_template(
        &self,
        template_code: &str,
        _language: &str,
    ) -> Result<Template, DeliveryError> {
        self.templates
            .get(template_code)
            .cloned()
            .ok_or_else(|| DeliveryError::Permanent(format!("template {} not found", template_code)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderBehavior {
    Succeed,
    FailTransiently,
    FailPermanently,
}

pub struct RecordingProvider {
    behavior: Mutex<ProviderBehavior>,
    deliveries: Mutex<Vec<(String, RenderedMessage)>>,
    pub calls: AtomicU32,
}

impl RecordingProvider {
    pub fn new(behavior: ProviderBehavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            deliveries: Mutex::new(Vec::new()),
            calls: AtomicU32::new(0),
        }
    }

    pub fn set_behavior(&self, behavior: ProviderBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn deliveries(&self) -> Vec<(String, RenderedMessage)> {
        self.deliveries.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeliveryProvider for RecordingProvider {
    fn name(&self) -> &'static str {
        "recording_provider"
    }

    async fn deliver(
        &self,
        recipient: &str,
        rendered: &RenderedMessage,
        _message: &QueueMessage,
    ) -> Result<(), DeliveryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let behavior = *self.behavior.lock().unwrap();
        match behavior {
            ProviderBehavior::Succeed => {
                self.deliveries
                    .lock()
                    .unwrap()
                    .push((recipient.to_string(), rendered.clone()));
                Ok(())
            }
            ProviderBehavior::FailTransiently => Err(DeliveryError::transient(
                "recording_provider",
                "503 Service Unavailable",
            )),
            ProviderBehavior::FailPermanently => Err(DeliveryError::Permanent(
                "recipient rejected".to_string(),
            )),
        }
    }
}

pub fn ann() -> UserProfile {
    UserProfile {
        email: Some("ann@example.com".to_string()),
        push_token: Some(VALID_PUSH_TOKEN.to_string()),
        prefers_email: true,
        prefers_push: true,
        language: "en".to_string(),
        first_name: "Ann".to_string(),
        last_name: "Lee".to_string(),
    }
}

pub fn welcome_email() -> Template {
    Template {
        notification_type: NotificationType::Email,
        subject: Some("Hi {{name}}".to_string()),
        content: "Welcome aboard, {{name}}. Your code is {{code}}.".to_string(),
    }
}

pub fn order_push() -> Template {
    Template {
        notification_type: NotificationType::Push,
        subject: Some("Order update".to_string()),
        content: "Order {{order_id}} has shipped".to_string(),
    }
}

pub fn submission(
    notification_type: &str,
    user_id: &str,
    template_code: &str,
    request_id: Option<&str>,
    variables: Value,
) -> SubmitNotification {
    SubmitNotification {
        notification_type: Some(notification_type.to_string()),
        user_id: Some(user_id.to_string()),
        template_code: Some(template_code.to_string()),
        variables: Some(variables),
        request_id: request_id.map(str::to_string),
        priority: None,
        metadata: None,
    }
}

pub fn queue_message(request_id: &str, user_id: &str, template_code: &str, variables: Value) -> QueueMessage {
    QueueMessage {
        request_id: request_id.to_string(),
        user_id: user_id.to_string(),
        template_code: template_code.to_string(),
        variables: variables.as_object().cloned().unwrap_or_default(),
        priority: 0,
        metadata: json!({}).as_object().cloned().unwrap_or_default(),
    }
}

pub fn payload(message: &QueueMessage) -> Vec<u8> {
    serde_json::to_vec(message).unwrap()
}

pub fn test_gateway(
    store: Arc<InMemoryStore>,
    publisher: Arc<RecordingPublisher>,
    settings: GatewaySettings,
) -> Gateway {
    Gateway::new(store, publisher, settings)
}

pub fn fast_worker_settings() -> WorkerSettings {
    WorkerSettings {
        retry: RetryConfig {
            retries: 1,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            backoff_multiplier: 2,
        },
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 2,
            recovery_timeout: Duration::from_secs(60),
        },
        status_ttl: Duration::from_secs(60),
    }
}

pub fn email_worker(
    users: Arc<dyn UserDirectory>,
    templates: Arc<dyn TemplateDirectory>,
    provider: Arc<RecordingProvider>,
    store: Arc<dyn NotificationStore>,
) -> DeliveryWorker {
    DeliveryWorker::new(
        NotificationType::Email,
        users,
        templates,
        provider,
        store,
        fast_worker_settings(),
    )
}

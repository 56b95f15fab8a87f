use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use gcp_auth::TokenProvider;
use reqwest::Client;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::{
    clients::collaborators::DeliveryProvider,
    error::DeliveryError,
    models::{
        notification::QueueMessage,
        provider::{FcmMessage, FcmNotification, FcmRequest},
        template::RenderedMessage,
    },
};

const DEPENDENCY: &str = "fcm";
const FCM_SCOPES: &[&str] = &["https://www.googleapis.com/auth/firebase.messaging"];

pub struct FcmClient {
    http_client: Client,
    base_url: String,
    fcm_project_id: String,
    token_provider: OnceCell<Arc<dyn TokenProvider>>,
}

impl FcmClient {
    pub fn new(base_url: &str, fcm_project_id: &str, timeout: Duration) -> Result<Self, Error> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))?;

        info!(project_id = fcm_project_id, "FCM client initialized");

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            fcm_project_id: fcm_project_id.to_string(),
            token_provider: OnceCell::new(),
        })
    }

    async fn access_token(&self) -> Result<String, DeliveryError> {
        let provider = self
            .token_provider
            .get_or_try_init(gcp_auth::provider)
            .await
            .map_err(|e| DeliveryError::transient(DEPENDENCY, format!("credentials: {}", e)))?;

        let token = provider
            .token(FCM_SCOPES)
            .await
            .map_err(|e| DeliveryError::transient(DEPENDENCY, format!("access token: {}", e)))?;

        Ok(token.as_str().to_string())
    }
}

pub fn build_fcm_request(
    device_token: &str,
    rendered: &RenderedMessage,
    message: &QueueMessage,
) -> FcmRequest {
    // FCM data values must be strings.
    let mut data: HashMap<String, String> = message
        .metadata
        .iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (key.clone(), value)
        })
        .collect();
    data.insert("request_id".to_string(), message.request_id.clone());
    data.insert("user_id".to_string(), message.user_id.clone());

    FcmRequest {
        message: FcmMessage {
            token: device_token.to_string(),
            notification: FcmNotification {
                title: rendered.subject.clone(),
                body: rendered.body.clone(),
            },
            data: Some(data),
        },
    }
}

#[async_trait]
impl DeliveryProvider for FcmClient {
    fn name(&self) -> &'static str {
        DEPENDENCY
    }

    async fn deliver(
        &self,
        recipient: &str,
        rendered: &RenderedMessage,
        message: &QueueMessage,
    ) -> Result<(), DeliveryError> {
        debug!(request_id = %message.request_id, "Sending FCM push notification");

        let request = build_fcm_request(recipient, rendered, message);
        let token = self.access_token().await?;

        let url = format!(
            "{}/v1/projects/{}/messages:send",
            self.base_url, self.fcm_project_id
        );

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(token)
            .json(&request)
            .send()
            .await
            .map_err(|e| DeliveryError::from_transport(DEPENDENCY, e))?;

        let status = response.status();
        if status.is_success() {
            info!(request_id = %message.request_id, "FCM push notification sent successfully");
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(DeliveryError::from_status(DEPENDENCY, status, &body))
        }
    }
}

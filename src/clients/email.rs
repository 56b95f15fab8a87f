use std::{collections::HashMap, time::Duration};

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info};

use crate::{
    clients::collaborators::DeliveryProvider,
    error::DeliveryError,
    models::{
        notification::QueueMessage,
        provider::{MailAddress, MailContent, MailPersonalization, MailRequest},
        template::RenderedMessage,
    },
};

const DEPENDENCY: &str = "email_provider";

/// Sends mail through a JSON HTTP mail API.
pub struct EmailClient {
    http_client: Client,
    api_url: String,
    api_key: String,
    from_address: String,
}

impl EmailClient {
    pub fn new(
        api_url: &str,
        api_key: &str,
        from_address: &str,
        timeout: Duration,
    ) -> Result<Self, Error> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))?;

        info!(api_url, from_address, "Email client initialized");

        Ok(Self {
            http_client,
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            from_address: from_address.to_string(),
        })
    }

    fn build_request(
        &self,
        recipient: &str,
        rendered: &RenderedMessage,
        message: &QueueMessage,
    ) -> MailRequest {
        MailRequest {
            personalizations: vec![MailPersonalization {
                to: vec![MailAddress {
                    email: recipient.to_string(),
                }],
            }],
            from: MailAddress {
                email: self.from_address.clone(),
            },
            subject: rendered.subject.clone(),
            content: vec![MailContent {
                content_type: "text/plain".to_string(),
                value: rendered.body.clone(),
            }],
            custom_args: HashMap::from([("request_id".to_string(), message.request_id.clone())]),
        }
    }
}

#[async_trait]
impl DeliveryProvider for EmailClient {
    fn name(&self) -> &'static str {
        DEPENDENCY
    }

    async fn deliver(
        &self,
        recipient: &str,
        rendered: &RenderedMessage,
        message: &QueueMessage,
    ) -> Result<(), DeliveryError> {
        debug!(request_id = %message.request_id, "Sending email notification");

        let request = self.build_request(recipient, rendered, message);

        let response = self
            .http_client
            .post(format!("{}/v3/mail/send", self.api_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| DeliveryError::from_transport(DEPENDENCY, e))?;

        let status = response.status();
        if status.is_success() {
            info!(request_id = %message.request_id, "Email notification sent successfully");
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(DeliveryError::from_status(DEPENDENCY, status, &body))
        }
    }
}

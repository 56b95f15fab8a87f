use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info};

use crate::{
    clients::collaborators::UserDirectory,
    error::DeliveryError,
    models::collaborator::{CollaboratorResponse, UserProfile},
};

const DEPENDENCY: &str = "user_service";

pub struct UserServiceClient {
    http_client: Client,
    base_url: String,
}

impl UserServiceClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, Error> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))?;

        info!(base_url, "User service client initialized");

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl UserDirectory for UserServiceClient {
    async fn fetch_user(&self, user_id: &str) -> Result<UserProfile, DeliveryError> {
        let url = format!("{}/api/v1/users/{}/", self.base_url, user_id);
        debug!(user_id, "Fetching user from service");

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| DeliveryError::from_transport(DEPENDENCY, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::from_status(DEPENDENCY, status, &body));
        }

        let envelope: CollaboratorResponse<UserProfile> = response
            .json()
            .await
            .map_err(|e| DeliveryError::from_transport(DEPENDENCY, e))?;

        match envelope {
            CollaboratorResponse {
                success: true,
                data: Some(user),
                ..
            } => Ok(user),
            CollaboratorResponse { error, message, .. } => Err(DeliveryError::Permanent(format!(
                "user {} not available: {}",
                user_id,
                error.or(message).unwrap_or_else(|| "no data".to_string())
            ))),
        }
    }
}

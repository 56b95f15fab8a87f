use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::{
    clients::collaborators::TemplateDirectory,
    error::DeliveryError,
    models::{
        collaborator::CollaboratorResponse,
        template::{RenderedMessage, Template},
        validation::validate_template_code,
    },
};

const DEPENDENCY: &str = "template_service";
const DEFAULT_SUBJECT: &str = "Notification";

pub struct TemplateServiceClient {
    http_client: Client,
    base_url: String,
}

impl TemplateServiceClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, Error> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))?;

        info!(base_url, "Template service client initialized");

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl TemplateDirectory for TemplateServiceClient {
    async fn fetch_template(
        &self,
        template_code: &str,
        language: &str,
    ) -> Result<Template, DeliveryError> {
        validate_template_code(template_code).map_err(|e| {
            DeliveryError::Permanent(format!("{}: {}", DEPENDENCY, e))
        })?;

        let url = format!("{}/api/v1/templates/{}/", self.base_url, template_code);
        debug!(template_code, language, "Fetching template from service");

        let response = self
            .http_client
            .get(&url)
            .query(&[("lang", language)])
            .send()
            .await
            .map_err(|e| DeliveryError::from_transport(DEPENDENCY, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::from_status(DEPENDENCY, status, &body));
        }

        let envelope: CollaboratorResponse<Template> = response
            .json()
            .await
            .map_err(|e| DeliveryError::from_transport(DEPENDENCY, e))?;

        match envelope {
            CollaboratorResponse {
                success: true,
                data: Some(template),
                ..
            } => Ok(template),
            CollaboratorResponse { error, message, .. } => Err(DeliveryError::Permanent(format!(
                "template {} not available: {}",
                template_code,
                error.or(message).unwrap_or_else(|| "no data".to_string())
            ))),
        }
    }
}

pub fn render_template(template: &Template, variables: &Map<String, Value>) -> RenderedMessage {
    debug!(variable_count = variables.len(), "Rendering template");

    let subject = template.subject.as_deref().unwrap_or(DEFAULT_SUBJECT);

    RenderedMessage {
        subject: replace_variables(subject, variables),
        body: replace_variables(&template.content, variables),
    }
}

/// Replaces each `{{key}}` with the string form of `variables[key]`.
///
/// Tokens without a matching variable stay as they are. Substituted text is
/// not scanned again.
pub fn replace_variables(template: &str, variables: &Map<String, Value>) -> String {
    let mut result = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        result.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];

        let Some(end) = after_open.find("}}") else {
            result.push_str(&rest[start..]);
            return result;
        };

        let key = &after_open[..end];
        match variables.get(key) {
            Some(value) => result.push_str(&value_to_string(value)),
            None => {
                // Keep the opening braces and rescan the remainder, so "{{{{a}}" still finds "{{a}}".
                result.push_str("{{");
                rest = after_open;
                continue;
            }
        }

        rest = &after_open[end + 2..];
    }

    result.push_str(rest);
    result
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

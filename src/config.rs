use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use dotenvy::dotenv;
use serde::Deserialize;

use crate::models::{
    circuit_breaker::CircuitBreakerConfig, notification::NotificationType, retry::RetryConfig,
};

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    pub rabbitmq_url: String,
    #[serde(default = "default_exchange_name")]
    pub exchange_name: String,
    #[serde(default = "default_dead_letter_exchange_name")]
    pub dead_letter_exchange_name: String,
    #[serde(default = "default_prefetch_count")]
    pub prefetch_count: u16,

    pub redis_url: String,
    #[serde(default = "default_idempotency_ttl_seconds")]
    pub idempotency_ttl_seconds: u64,
    #[serde(default = "default_status_ttl_seconds")]
    pub status_ttl_seconds: u64,
    #[serde(default)]
    pub release_idempotency_key_on_publish_failure: bool,

    #[serde(default)]
    pub database_url: Option<String>,

    #[serde(default)]
    pub user_service_url: Option<String>,
    #[serde(default)]
    pub template_service_url: Option<String>,

    #[serde(default)]
    pub email_api_url: Option<String>,
    #[serde(default)]
    pub email_api_key: Option<String>,
    #[serde(default)]
    pub email_from_address: Option<String>,

    #[serde(default)]
    pub fcm_project_id: Option<String>,
    #[serde(default = "default_fcm_base_url")]
    pub fcm_base_url: String,

    #[serde(default = "default_failure_threshold")]
    pub circuit_breaker_failure_threshold: u32,
    #[serde(default = "default_recovery_timeout_seconds")]
    pub circuit_breaker_recovery_timeout_seconds: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_retry_delay_ms")]
    pub initial_retry_delay_ms: u64,
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
    #[serde(default = "default_retry_backoff_multiplier")]
    pub retry_backoff_multiplier: u64,

    #[serde(default = "default_http_timeout_seconds")]
    pub http_timeout_seconds: u64,

    #[serde(default = "default_worker_notification_type")]
    pub worker_notification_type: NotificationType,

    #[serde(default = "default_server_port")]
    pub server_port: u16,

    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_exchange_name() -> String {
    "notifications.direct".to_string()
}

fn default_dead_letter_exchange_name() -> String {
    "notifications.dlx".to_string()
}

fn default_prefetch_count() -> u16 {
    1
}

fn default_idempotency_ttl_seconds() -> u64 {
    3600
}

fn default_status_ttl_seconds() -> u64 {
    86400
}

fn default_fcm_base_url() -> String {
    "https://fcm.googleapis.com".to_string()
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_recovery_timeout_seconds() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_retry_delay_ms() -> u64 {
    1000
}

fn default_max_retry_delay_ms() -> u64 {
    60_000
}

fn default_retry_backoff_multiplier() -> u64 {
    2
}

fn default_http_timeout_seconds() -> u64 {
    10
}

fn default_worker_notification_type() -> NotificationType {
    NotificationType::Email
}

fn default_server_port() -> u16 {
    8000
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        dotenv().ok();

        let config = envy::from_env::<Self>()
            .map_err(|e| anyhow!("Invalid or missing environmental variable: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// A worker holds at most one unacknowledged message.
    pub fn validate(&self) -> Result<(), Error> {
        if self.prefetch_count != 1 {
            return Err(anyhow!(
                "PREFETCH_COUNT must be 1, got {}",
                self.prefetch_count
            ));
        }

        Ok(())
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            retries: self.max_retries,
            initial_delay_ms: self.initial_retry_delay_ms,
            max_delay_ms: self.max_retry_delay_ms,
            backoff_multiplier: self.retry_backoff_multiplier,
        }
    }

    pub fn circuit_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.circuit_breaker_failure_threshold,
            recovery_timeout: Duration::from_secs(self.circuit_breaker_recovery_timeout_seconds),
        }
    }

    pub fn idempotency_ttl(&self) -> Duration {
        Duration::from_secs(self.idempotency_ttl_seconds)
    }

    pub fn status_ttl(&self) -> Duration {
        Duration::from_secs(self.status_ttl_seconds)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_seconds)
    }

    /// Fetches an optional setting that a particular process role cannot run without.
    pub fn require<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str, Error> {
        value
            .as_deref()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| anyhow!("Missing required environmental variable {}", name))
    }
}

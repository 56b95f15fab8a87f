use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationType {
    Email,
    Push,
}

impl NotificationType {
    pub const ALL: [NotificationType; 2] = [NotificationType::Email, NotificationType::Push];

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::Email => "email",
            NotificationType::Push => "push",
        }
    }

    /// Routing key on the main exchange.
    pub fn routing_key(&self) -> &'static str {
        self.as_str()
    }

    pub fn queue_name(&self) -> String {
        format!("{}.queue", self.as_str())
    }

    pub fn dead_letter_queue_name(&self) -> String {
        format!("{}.dlq", self.as_str())
    }

    /// Routing key on the dead-letter exchange; identical to the DLQ name.
    pub fn dead_letter_routing_key(&self) -> String {
        self.dead_letter_queue_name()
    }
}

impl Display for NotificationType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(NotificationType::Email),
            "push" => Ok(NotificationType::Push),
            other => Err(format!(
                "notification_type must be one of 'email', 'push' (got '{}')",
                other
            )),
        }
    }
}

/// Submission body as received over HTTP, before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitNotification {
    #[serde(default)]
    pub notification_type: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub template_code: Option<String>,
    #[serde(default)]
    pub variables: Option<Value>,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotificationRequest {
    pub request_id: String,
    pub user_id: String,
    pub notification_type: NotificationType,
    pub template_code: String,
    pub variables: Map<String, Value>,
    pub priority: i32,
    pub metadata: Map<String, Value>,
}

impl NotificationRequest {
    pub fn to_queue_message(&self) -> QueueMessage {
        QueueMessage {
            request_id: self.request_id.clone(),
            user_id: self.user_id.clone(),
            template_code: self.template_code.clone(),
            variables: self.variables.clone(),
            priority: self.priority,
            metadata: self.metadata.clone(),
        }
    }
}

/// Queue wire payload. The notification type travels as the routing key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub request_id: String,
    pub user_id: String,
    pub template_code: String,
    #[serde(default)]
    pub variables: Map<String, Value>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted { request_id: String },
    Duplicate { request_id: String },
}

impl SubmitOutcome {
    pub fn request_id(&self) -> &str {
        match self {
            SubmitOutcome::Accepted { request_id } | SubmitOutcome::Duplicate { request_id } => {
                request_id
            }
        }
    }
}

use serde::{Deserialize, Serialize};

/// Envelope returned by the user and template services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaboratorResponse<T> {
    pub success: bool,
    #[serde(default = "Option::default")]
    pub data: Option<T>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub push_token: Option<String>,
    #[serde(default = "default_true")]
    pub prefers_email: bool,
    #[serde(default = "default_true")]
    pub prefers_push: bool,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
}

fn default_true() -> bool {
    true
}

fn default_language() -> String {
    "en".to_string()
}

impl UserProfile {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

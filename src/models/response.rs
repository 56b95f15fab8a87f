use serde::Serialize;
use serde_json::{Map, Value};

/// Envelope shared by every gateway endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<Value>,
    pub message: String,
    pub meta: Map<String, Value>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            message: message.into(),
            meta: Map::new(),
        }
    }

    pub fn message_only(success: bool, message: impl Into<String>) -> Self {
        Self {
            success,
            data: None,
            error: None,
            message: message.into(),
            meta: Map::new(),
        }
    }

    pub fn error(error: impl Into<Value>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            message: message.into(),
            meta: Map::new(),
        }
    }
}

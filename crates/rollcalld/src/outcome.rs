//! JSON envelope returned by every service method.

use crate::engine::EngineError;
use serde::Serialize;
use serde_json::{Map, Value};

/// `{"success": bool, "message": str, "kind"?: str, ...payload}`
#[derive(Debug, Serialize)]
pub struct Outcome {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<&'static str>,
    #[serde(flatten)]
    payload: Map<String, Value>,
}

impl Outcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            kind: None,
            payload: Map::new(),
        }
    }

    pub fn failed(kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            kind: Some(kind),
            payload: Map::new(),
        }
    }

    pub fn from_error(err: &EngineError) -> Self {
        match err {
            EngineError::Attend(e) => Self::failed(e.kind(), e.to_string()),
            EngineError::ChannelClosed => Self::failed("Unavailable", err.to_string()),
        }
    }

    pub fn with(mut self, key: &str, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.payload.insert(key.to_string(), value);
        self
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"success":false,"message":"unserializable outcome: {e}"}}"#)
        })
    }
}

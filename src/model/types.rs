use serde::{Deserialize, Serialize};

use super::presets::AppliedPreset;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerationRequest {
    #[serde(default)]
    pub prompt: String,
    pub model: Option<String>,
    pub max_tokens: Option<i64>,
    pub temperature: Option<f64>,
    pub bundle_id: Option<String>,
    pub image_names: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationResponse {
    pub bundle_id: String,
    pub html: String,
    pub html_preview: String,
    pub meta: serde_json::Map<String, serde_json::Value>,
    pub assets: Vec<String>,
    pub applied: AppliedPreset,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

/// Body of a non-streaming chat completion call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatPayload {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub max_tokens: u32,
    pub stream: bool,
}

//! Wire types for the agent's HTTP API.

use serde::{Deserialize, Serialize};

/// An agent-side session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSession {
    /// Agent session id (e.g. "ses_xxx").
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Working directory the session is rooted at.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,
}

/// Model selector sent with a prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRef {
    #[serde(rename = "providerID")]
    pub provider_id: String,
    #[serde(rename = "modelID")]
    pub model_id: String,
}

/// A part of a prompt message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PromptPart {
    Text { text: String },
}

/// Prompt submission body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptRequest {
    pub parts: Vec<PromptPart>,
    pub model: ModelRef,
}

impl PromptRequest {
    /// Single text part with an explicit provider/model pair.
    pub fn text(text: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            parts: vec![PromptPart::Text { text: text.into() }],
            model: ModelRef {
                provider_id: "anthropic".to_string(),
                model_id: model.into(),
            },
        }
    }
}

/// A part of the agent's response message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MessagePart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Unknown,
}

/// Token usage reported by the agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<i64>,
}

/// Error object attached to a failed response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentApiError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AgentApiError {
    pub fn describe(&self) -> String {
        match (&self.name, &self.message) {
            (Some(name), Some(message)) => format!("{name}: {message}"),
            (Some(name), None) => name.clone(),
            (None, Some(message)) => message.clone(),
            (None, None) => "unknown agent error".to_string(),
        }
    }
}

/// Metadata on a prompt response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<AgentApiError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenUsage>,
}

/// Full prompt response: info plus message parts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptResponse {
    #[serde(default)]
    pub info: PromptInfo,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

/// Concatenate all text parts, joined by blank lines.
pub fn extract_text(parts: &[MessagePart]) -> String {
    parts
        .iter()
        .filter_map(|part| match part {
            MessagePart::Text { text } => Some(text.as_str()),
            MessagePart::Unknown => None,
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

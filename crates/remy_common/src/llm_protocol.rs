//! Wire types shared between the daemon and the language backend.
//!
//! The Ollama `/api/chat` shapes live here alongside the backend-neutral
//! chat and tool-call types the orchestrator works with.

use crate::intent::Intent;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};

/// One message in a chat transcript.
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

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
        }
    }

    /// A tool result fed back into the transcript.
    pub fn tool(content: impl Into<String>) -> Self {
        Self {
            role: "tool".into(),
            content: content.into(),
        }
    }
}

/// A tool the model is allowed to call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema for the arguments object.
    pub parameters: Value,
}

impl ToolSpec {
    /// The function-wrapper envelope Ollama expects in `tools`.
    pub fn to_wire(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

/// A tool invocation the model asked for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// What one chat round produced: either prose or tool calls to run.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatOutcome {
    Message(String),
    ToolCalls(Vec<ToolCallRequest>),
}

fn intent_label<'de, D>(deserializer: D) -> Result<Intent, D::Error>
where
    D: Deserializer<'de>,
{
    // Labels the model invents collapse to Unknown instead of failing the turn.
    let s = String::deserialize(deserializer)?;
    Ok(Intent::from_str(&s).unwrap_or(Intent::Unknown))
}

/// Classifier output for one user message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedIntent {
    #[serde(default, deserialize_with = "intent_label")]
    pub intent: Intent,
    /// As reported by the model; use [`confidence_percent`] for comparisons.
    ///
    /// [`confidence_percent`]: ClassifiedIntent::confidence_percent
    #[serde(default, deserialize_with = "crate::coerce::lenient_f64_or_zero")]
    pub confidence: f64,
    /// Free-form extraction (food names, amounts, goal fields).
    #[serde(default)]
    pub entities: Value,
}

impl ClassifiedIntent {
    pub fn unknown() -> Self {
        Self {
            intent: Intent::Unknown,
            confidence: 0.0,
            entities: Value::Null,
        }
    }

    /// Normalizes to the 0..=100 scale regardless of whether the model
    /// answered with a fraction or a percentage.
    pub fn confidence_percent(&self) -> f64 {
        let c = if self.confidence <= 1.0 {
            self.confidence * 100.0
        } else {
            self.confidence
        };
        c.clamp(0.0, 100.0)
    }
}

// ============================================================================
// Ollama /api/chat wire format
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct OllamaChatRequest {
    pub model: String,
    pub messages: Vec<OllamaMessage>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Value>>,
    pub keep_alive: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaMessage {
    pub role: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<OllamaToolCall>>,
}

impl From<&ChatMessage> for OllamaMessage {
    fn from(msg: &ChatMessage) -> Self {
        Self {
            role: msg.role.clone(),
            content: msg.content.clone(),
            tool_calls: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaToolCall {
    pub function: OllamaFunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaFunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl From<OllamaToolCall> for ToolCallRequest {
    fn from(call: OllamaToolCall) -> Self {
        Self {
            name: call.function.name,
            arguments: call.function.arguments,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OllamaChatResponse {
    pub message: OllamaMessage,
}

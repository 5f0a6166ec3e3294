//! Language backend abstraction.
//!
//! One trait covers every model call the daemon makes: intent
//! classification, tool-calling chat, recipe parsing, portion estimation
//! and food lookup. The real implementation talks to Ollama; tests queue
//! canned values on [`FakeLanguageService`].

use async_trait::async_trait;
use remy_common::llm_protocol::{ChatMessage, ChatOutcome, ClassifiedIntent, ToolSpec};
use remy_common::nutrition::FoodMatch;
use remy_common::recipe::ParsedRecipe;
use serde_json::Value;

pub mod ollama;

pub use ollama::OllamaService;

/// Language backend errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("Invalid JSON response: {0}")]
    InvalidJson(String),

    #[error("Request timeout after {0} seconds")]
    Timeout(u64),

    #[error("model returned empty response")]
    EmptyResponse,
}

impl LlmError {
    /// Worth retrying: the backend may be briefly unreachable or slow.
    /// Malformed output is handled by the flexible parser, not the retry
    /// loop.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::HttpError(_) | Self::Timeout(_) | Self::EmptyResponse
        )
    }
}

/// Everything the orchestrator asks of the model.
#[async_trait]
pub trait LanguageService: Send + Sync {
    /// Label a user message with an intent and confidence.
    async fn classify_intent(
        &self,
        message: &str,
        recent: &[ChatMessage],
    ) -> Result<ClassifiedIntent, LlmError>;

    /// One chat round; the model may answer in prose or request tool calls.
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<ChatOutcome, LlmError>;

    /// Extract a structured recipe from free text.
    async fn parse_recipe(&self, text: &str) -> Result<ParsedRecipe, LlmError>;

    /// Estimate how many reference servings a described portion equals.
    async fn estimate_multiplier(&self, portion: &str, reference: &str) -> Result<f64, LlmError>;

    /// Estimate nutrition candidates for a food and portion.
    async fn lookup_food(&self, food: &str, portion: &str) -> Result<Vec<FoodMatch>, LlmError>;

    /// Cheap reachability probe for the health endpoint.
    async fn healthcheck(&self) -> Result<(), LlmError>;
}

/// Fake language backend for testing.
///
/// Responses are queued as raw JSON values and interpreted per method; the
/// last response repeats once the queue runs down to one entry.
pub struct FakeLanguageService {
    responses: std::sync::Mutex<Vec<Result<Value, LlmError>>>,
    call_count: std::sync::Mutex<usize>,
}

impl FakeLanguageService {
    pub fn new(responses: Vec<Result<Value, LlmError>>) -> Self {
        Self {
            responses: std::sync::Mutex::new(responses),
            call_count: std::sync::Mutex::new(0),
        }
    }

    /// A fake that always answers with the same value.
    pub fn always_valid(json: Value) -> Self {
        Self::new(vec![Ok(json)])
    }

    /// A fake that always fails.
    pub fn always_error(error: LlmError) -> Self {
        Self::new(vec![Err(error)])
    }

    pub fn call_count(&self) -> usize {
        *self.call_count.lock().unwrap()
    }

    fn next_response(&self) -> Result<Value, LlmError> {
        let mut count = self.call_count.lock().unwrap();
        *count += 1;

        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        if responses.len() == 1 {
            responses[0].clone()
        } else {
            responses.remove(0)
        }
    }
}

#[async_trait]
impl LanguageService for FakeLanguageService {
    async fn classify_intent(
        &self,
        _message: &str,
        _recent: &[ChatMessage],
    ) -> Result<ClassifiedIntent, LlmError> {
        let value = self.next_response()?;
        serde_json::from_value(value).map_err(|e| LlmError::InvalidJson(e.to_string()))
    }

    async fn chat(
        &self,
        _messages: &[ChatMessage],
        _tools: &[ToolSpec],
    ) -> Result<ChatOutcome, LlmError> {
        let value = self.next_response()?;
        if let Some(calls) = value.get("tool_calls").and_then(|v| v.as_array()) {
            let requests = calls
                .iter()
                .map(|c| serde_json::from_value(c.clone()))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| LlmError::InvalidJson(e.to_string()))?;
            return Ok(ChatOutcome::ToolCalls(requests));
        }
        if let Some(content) = value.get("content").and_then(|v| v.as_str()) {
            return Ok(ChatOutcome::Message(content.to_string()));
        }
        if let Some(text) = value.as_str() {
            return Ok(ChatOutcome::Message(text.to_string()));
        }
        Err(LlmError::InvalidJson(format!(
            "fake chat response has neither content nor tool_calls: {}",
            value
        )))
    }

    async fn parse_recipe(&self, _text: &str) -> Result<ParsedRecipe, LlmError> {
        let value = self.next_response()?;
        serde_json::from_value(value).map_err(|e| LlmError::InvalidJson(e.to_string()))
    }

    async fn estimate_multiplier(
        &self,
        _portion: &str,
        _reference: &str,
    ) -> Result<f64, LlmError> {
        let value = self.next_response()?;
        value
            .as_f64()
            .or_else(|| value.get("multiplier").and_then(|v| v.as_f64()))
            .ok_or_else(|| LlmError::InvalidJson(format!("not a multiplier: {}", value)))
    }

    async fn lookup_food(&self, _food: &str, _portion: &str) -> Result<Vec<FoodMatch>, LlmError> {
        let value = self.next_response()?;
        let matches = if value.is_array() {
            value
        } else {
            value.get("matches").cloned().unwrap_or(Value::Null)
        };
        serde_json::from_value(matches).map_err(|e| LlmError::InvalidJson(e.to_string()))
    }

    async fn healthcheck(&self) -> Result<(), LlmError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use remy_common::intent::Intent;
    use serde_json::json;

    #[tokio::test]
    async fn fake_repeats_last_response() {
        let fake = FakeLanguageService::always_valid(json!({
            "intent": "log_food",
            "confidence": 0.9
        }));
        for _ in 0..3 {
            let c = fake.classify_intent("I ate a banana", &[]).await.unwrap();
            assert_eq!(c.intent, Intent::LogFood);
        }
        assert_eq!(fake.call_count(), 3);
    }

    #[tokio::test]
    async fn fake_chat_distinguishes_prose_from_tool_calls() {
        let fake = FakeLanguageService::new(vec![
            Ok(json!({
                "tool_calls": [{"name": "lookup_food", "arguments": {"food": "banana"}}]
            })),
            Ok(json!({"content": "A banana has about 105 calories."})),
        ]);

        match fake.chat(&[], &[]).await.unwrap() {
            ChatOutcome::ToolCalls(calls) => {
                assert_eq!(calls.len(), 1);
                assert_eq!(calls[0].name, "lookup_food");
            }
            other => panic!("expected tool calls, got {:?}", other),
        }
        match fake.chat(&[], &[]).await.unwrap() {
            ChatOutcome::Message(text) => assert!(text.contains("105")),
            other => panic!("expected message, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn fake_errors_propagate() {
        let fake = FakeLanguageService::always_error(LlmError::Timeout(30));
        let err = fake.parse_recipe("chili: beans, beef").await.unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn invalid_json_is_not_transient() {
        assert!(!LlmError::InvalidJson("nope".into()).is_transient());
        assert!(LlmError::HttpError("503".into()).is_transient());
        assert!(LlmError::EmptyResponse.is_transient());
    }
}

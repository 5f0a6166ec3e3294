//! Ollama-backed language service.
//!
//! All calls go through `/api/chat`. JSON-shaped calls set `format: json`
//! and still run the flexible parser, because small local models wrap JSON
//! in prose more often than they should. Parse failures degrade to safe
//! defaults (unknown intent, multiplier 1.0, empty extraction) instead of
//! failing the turn; transport failures propagate as [`LlmError`].

use super::{LanguageService, LlmError};
use crate::config::LanguageConfig;
use async_trait::async_trait;
use remy_common::llm_protocol::{
    ChatMessage, ChatOutcome, ClassifiedIntent, OllamaChatRequest, OllamaChatResponse,
    OllamaMessage, ToolCallRequest, ToolSpec,
};
use remy_common::nutrition::FoodMatch;
use remy_common::recipe::ParsedRecipe;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

const CLASSIFY_SYSTEM_PROMPT: &str = r#"You classify one user message for a nutrition assistant.
Intent labels:
- log_food: user ate or drank something and wants it recorded
- log_recipe: user wants to log a serving of a recipe they saved earlier
- save_recipe: user wants to store a recipe (name plus ingredients)
- query_nutrition: question about foods, intake, or progress
- update_goals: user sets or changes a nutrition target
- confirm: bare agreement with whatever was just proposed
- decline: bare refusal or "never mind"
- clarify: user is answering a question the assistant asked
- modify: user amends something just logged or proposed
- greet: greeting or pleasantry
- off_topic: unrelated to food and nutrition
- unknown: none of the above fits

Respond with JSON only:
{"intent": "<label>", "confidence": <0.0-1.0>, "entities": {"foods": [...], "amounts": [...], "recipe_name": null, "goal_field": null, "goal_value": null}}"#;

const PARSE_RECIPE_SYSTEM_PROMPT: &str = r#"You extract a recipe from one user message for a nutrition assistant.
Pull out the recipe name, the serving count if the user stated one, and every ingredient with quantity and unit when given.
Do not invent ingredients that are not in the text. Use quantity 0 and unit "" when the user gave none.

Respond with JSON only:
{"name": "<name or short description>", "servings": <number or null>, "ingredients": [{"name": "...", "quantity": <number>, "unit": "..."}], "instructions": []}"#;

const MULTIPLIER_SYSTEM_PROMPT: &str = r#"You compare two portion descriptions of the same food.
Answer how many reference portions the described portion equals. 1.0 means the same amount, 0.5 means half, 2.0 means double.

Respond with JSON only:
{"multiplier": <number>}"#;

const LOOKUP_SYSTEM_PROMPT: &str = r#"You estimate nutrition for one food and portion, as eaten.
Return up to three candidate interpretations, best first, each with a confidence between 0 and 1.
Use typical values for the named portion; when no portion is given, assume one standard serving.

Respond with JSON only:
{"matches": [{"name": "...", "portion": "...", "confidence": <0.0-1.0>, "nutrition": {"calories": <number>, "protein_g": <number>, "carbs_g": <number>, "fat_g": <number>, "fiber_g": <number>}}]}"#;

pub struct OllamaService {
    http_client: reqwest::Client,
    endpoint: String,
    model: String,
    keep_alive: String,
    timeout_secs: u64,
}

impl OllamaService {
    pub fn new(config: &LanguageConfig) -> Result<Self, LlmError> {
        let timeout_secs = config.effective_timeout();
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| LlmError::HttpError(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http_client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            keep_alive: config.keep_alive.clone(),
            timeout_secs,
        })
    }

    fn map_reqwest(&self, e: reqwest::Error) -> LlmError {
        if e.is_timeout() {
            LlmError::Timeout(self.timeout_secs)
        } else {
            LlmError::HttpError(format!("request failed: {}", e))
        }
    }

    async fn chat_round(
        &self,
        messages: Vec<OllamaMessage>,
        format: Option<String>,
        tools: Option<Vec<Value>>,
    ) -> Result<OllamaMessage, LlmError> {
        let url = format!("{}/api/chat", self.endpoint);
        let request = OllamaChatRequest {
            model: self.model.clone(),
            messages,
            stream: false,
            format,
            tools,
            keep_alive: self.keep_alive.clone(),
        };

        debug!(
            "llm call [{}] ({} messages, keep_alive {})",
            self.model,
            request.messages.len(),
            self.keep_alive
        );

        let response = self
            .http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_reqwest(e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::HttpError(format!(
                "Ollama returned {}: {}",
                status, body
            )));
        }

        let chat: OllamaChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidJson(format!("bad response envelope: {}", e)))?;
        Ok(chat.message)
    }

    /// JSON-mode call: system + user prompt in, one content string out.
    async fn call_json(&self, system: &str, user: &str) -> Result<String, LlmError> {
        let messages = vec![
            OllamaMessage {
                role: "system".into(),
                content: system.into(),
                tool_calls: None,
            },
            OllamaMessage {
                role: "user".into(),
                content: user.into(),
                tool_calls: None,
            },
        ];
        let message = self
            .chat_round(messages, Some("json".into()), None)
            .await?;
        if message.content.trim().is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(message.content)
    }
}

#[async_trait]
impl LanguageService for OllamaService {
    async fn classify_intent(
        &self,
        message: &str,
        recent: &[ChatMessage],
    ) -> Result<ClassifiedIntent, LlmError> {
        let mut user = String::new();
        if !recent.is_empty() {
            user.push_str("Recent conversation:\n");
            for m in recent {
                user.push_str(&format!("{}: {}\n", m.role, m.content));
            }
            user.push('\n');
        }
        user.push_str(&format!("Message to classify: {}", message));

        let text = self.call_json(CLASSIFY_SYSTEM_PROMPT, &user).await?;
        Ok(classify_from_text(&text))
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<ChatOutcome, LlmError> {
        let wire_messages: Vec<OllamaMessage> = messages.iter().map(OllamaMessage::from).collect();
        let wire_tools = if tools.is_empty() {
            None
        } else {
            Some(tools.iter().map(|t| t.to_wire()).collect())
        };
        let message = self.chat_round(wire_messages, None, wire_tools).await?;
        outcome_from_message(message)
    }

    async fn parse_recipe(&self, text: &str) -> Result<ParsedRecipe, LlmError> {
        let content = self.call_json(PARSE_RECIPE_SYSTEM_PROMPT, text).await?;
        Ok(recipe_from_text(&content))
    }

    async fn estimate_multiplier(&self, portion: &str, reference: &str) -> Result<f64, LlmError> {
        let user = format!(
            "Described portion: {}\nReference portion: {}",
            portion, reference
        );
        let content = self.call_json(MULTIPLIER_SYSTEM_PROMPT, &user).await?;
        Ok(multiplier_from_text(&content))
    }

    async fn lookup_food(&self, food: &str, portion: &str) -> Result<Vec<FoodMatch>, LlmError> {
        let user = if portion.is_empty() {
            format!("Food: {}", food)
        } else {
            format!("Food: {}\nPortion: {}", food, portion)
        };
        let content = self.call_json(LOOKUP_SYSTEM_PROMPT, &user).await?;
        Ok(matches_from_text(&content))
    }

    async fn healthcheck(&self) -> Result<(), LlmError> {
        let url = format!("{}/api/tags", self.endpoint);
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.map_reqwest(e))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(LlmError::HttpError(format!(
                "Ollama returned {}",
                response.status()
            )))
        }
    }
}

/// Slice out the outermost JSON object when the model wrapped it in prose.
fn extract_json(text: &str) -> &str {
    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            return &text[start..=end];
        }
    }
    text
}

fn classify_from_text(text: &str) -> ClassifiedIntent {
    if let Ok(c) = serde_json::from_str::<ClassifiedIntent>(text) {
        return c;
    }
    match serde_json::from_str::<ClassifiedIntent>(extract_json(text)) {
        Ok(c) => c,
        Err(e) => {
            warn!("unparseable classifier output ({}): {}", e, text);
            ClassifiedIntent::unknown()
        }
    }
}

fn recipe_from_text(text: &str) -> ParsedRecipe {
    if let Ok(r) = serde_json::from_str::<ParsedRecipe>(text) {
        return r;
    }
    match serde_json::from_str::<ParsedRecipe>(extract_json(text)) {
        Ok(r) => r,
        Err(e) => {
            // An empty parse is handled upstream as "no ingredients caught".
            warn!("unparseable recipe extraction ({}): {}", e, text);
            ParsedRecipe::default()
        }
    }
}

fn multiplier_from_text(text: &str) -> f64 {
    let value: Option<f64> = serde_json::from_str::<Value>(extract_json(text))
        .ok()
        .and_then(|v| {
            v.get("multiplier")
                .and_then(|m| m.as_f64())
                .or_else(|| v.as_f64())
        })
        .or_else(|| text.trim().parse().ok());
    match value {
        Some(m) if m.is_finite() && m > 0.0 => m,
        _ => {
            warn!("unparseable multiplier output, using 1.0: {}", text);
            1.0
        }
    }
}

fn matches_from_text(text: &str) -> Vec<FoodMatch> {
    let parsed: Option<Vec<FoodMatch>> = serde_json::from_str::<Value>(extract_json(text))
        .ok()
        .and_then(|v| {
            let arr = if v.is_array() {
                v
            } else {
                v.get("matches").cloned()?
            };
            serde_json::from_value(arr).ok()
        });
    match parsed {
        Some(matches) => matches,
        None => {
            warn!("unparseable lookup output: {}", text);
            Vec::new()
        }
    }
}

fn outcome_from_message(message: OllamaMessage) -> Result<ChatOutcome, LlmError> {
    if let Some(calls) = message.tool_calls {
        let requests: Vec<ToolCallRequest> =
            calls.into_iter().map(ToolCallRequest::from).collect();
        if !requests.is_empty() {
            return Ok(ChatOutcome::ToolCalls(requests));
        }
    }
    let content = message.content.trim();
    if content.is_empty() {
        return Err(LlmError::EmptyResponse);
    }
    Ok(ChatOutcome::Message(content.to_string()))
}

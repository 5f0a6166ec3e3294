//! Tool-calling loop for open questions.
//!
//! Messages no flow claims go to the language model with a small set of
//! data tools. Rounds are capped; within a round all requested tools run
//! concurrently and a single failure becomes an error-shaped result rather
//! than aborting its siblings. Some tool results are recognized and acted
//! on directly ("one saved recipe matched", "the analysis still needs a
//! serving count"): the loop sets a pending action and answers
//! deterministically instead of asking the model to narrate.

use anyhow::Result;
use remy_common::{
    AssistantResponse, ChatMessage, ChatOutcome, ClarificationOption, ClarificationPrompt,
    FoodLogDraft, FoodMatch, LogSavedRecipe, PendingAction, ResponseType, ServingSizePrompt,
    ToolCallRequest, ToolSpec,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::flows::food_log::numbered_listing;
use crate::flows::query::local_day_bounds;
use crate::flows::RecipeFlow;
use crate::llm::{LanguageService, LlmError};
use crate::lookup::{LookupOutcome, NutritionLookup};
use crate::matcher::{FuzzyMatcher, MatchCandidate, SearchVerdict};
use crate::retry::RetryPolicy;
use crate::store::Db;

const SYSTEM_PROMPT: &str = "You are Remy, a friendly nutrition assistant. \
Answer questions about the user's diet, foods and goals. Use the tools for \
any data about foods, recipes, totals or goals instead of guessing. Keep \
answers to a sentence or two.";

const FALLBACK_ANSWER: &str = "I'm not sure how to help with that one. You \
can log foods, save recipes, set goals, or ask about your day.";

/// Lookup hits below this confidence are narrated, not offered for logging.
const OFFER_TO_LOG_CONFIDENCE: f64 = 0.8;

#[derive(Clone)]
pub struct ToolLoop {
    db: Db,
    language: Arc<dyn LanguageService>,
    lookup: Arc<dyn NutritionLookup>,
    matcher: FuzzyMatcher,
    recipe: Arc<RecipeFlow>,
    retry: RetryPolicy,
    max_rounds: usize,
}

/// One executed tool call: the JSON fed back to the model, plus an action
/// the loop takes itself when the result speaks for itself.
struct ToolResult {
    name: String,
    payload: Value,
    intercept: Option<Intercept>,
}

enum Intercept {
    NeedsServingCount(ServingSizePrompt),
    OneRecipeMatch { id: String, name: String },
    OfferToLog { food: FoodMatch, query: String },
    PickFood { options: Vec<FoodMatch>, query: String },
    PickRecipe { options: Vec<(String, String)>, query: String },
}

impl ToolLoop {
    pub fn new(
        db: Db,
        language: Arc<dyn LanguageService>,
        lookup: Arc<dyn NutritionLookup>,
        matcher: FuzzyMatcher,
        recipe: Arc<RecipeFlow>,
        retry: RetryPolicy,
        max_rounds: usize,
    ) -> Self {
        Self {
            db,
            language,
            lookup,
            matcher,
            recipe,
            retry,
            max_rounds: max_rounds.max(1),
        }
    }

    pub async fn answer(
        &self,
        user_id: &str,
        message: &str,
        history: &[ChatMessage],
        timezone: Option<&str>,
    ) -> Result<AssistantResponse> {
        let tools = tool_specs();
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(SYSTEM_PROMPT));
        messages.extend_from_slice(history);
        messages.push(ChatMessage::user(message));

        for round in 1..=self.max_rounds {
            let outcome = self
                .retry
                .run_if("tool chat", LlmError::is_transient, || {
                    self.language.chat(&messages, &tools)
                })
                .await;
            let calls = match outcome {
                Ok(ChatOutcome::Message(text)) if !text.trim().is_empty() => {
                    return Ok(AssistantResponse::success(ResponseType::Answer, text.trim()));
                }
                Ok(ChatOutcome::Message(_)) => {
                    return Ok(AssistantResponse::success(ResponseType::Answer, FALLBACK_ANSWER));
                }
                Ok(ChatOutcome::ToolCalls(calls)) if calls.is_empty() => {
                    return Ok(AssistantResponse::success(ResponseType::Answer, FALLBACK_ANSWER));
                }
                Ok(ChatOutcome::ToolCalls(calls)) => calls,
                Err(e) => {
                    warn!("Tool chat failed: {}", e);
                    return Ok(AssistantResponse::success(
                        ResponseType::Answer,
                        "I'm having trouble thinking that through right now. \
                         Mind trying again in a moment?",
                    ));
                }
            };

            debug!(
                "Round {}: model requested {:?}",
                round,
                calls.iter().map(|c| c.name.as_str()).collect::<Vec<_>>()
            );
            let results = self.execute_all(user_id, timezone, calls).await;

            for result in &results {
                if let Some(intercept) = &result.intercept {
                    return self.act_on(user_id, intercept).await;
                }
            }

            let requested: Vec<&str> = results.iter().map(|r| r.name.as_str()).collect();
            messages.push(ChatMessage::assistant(format!(
                "(consulting {})",
                requested.join(", ")
            )));
            for result in results {
                messages.push(ChatMessage::tool(
                    json!({"tool": result.name, "result": result.payload}).to_string(),
                ));
            }
        }

        // Rounds exhausted; one last pass with no tools forces prose.
        match self.language.chat(&messages, &[]).await {
            Ok(ChatOutcome::Message(text)) if !text.trim().is_empty() => {
                Ok(AssistantResponse::success(ResponseType::Answer, text.trim()))
            }
            _ => Ok(AssistantResponse::success(ResponseType::Answer, FALLBACK_ANSWER)),
        }
    }

    /// Run every requested call concurrently, keeping request order in the
    /// output.
    async fn execute_all(
        &self,
        user_id: &str,
        timezone: Option<&str>,
        calls: Vec<ToolCallRequest>,
    ) -> Vec<ToolResult> {
        let mut join_set = JoinSet::new();
        let count = calls.len();
        for (index, call) in calls.into_iter().enumerate() {
            let this = self.clone();
            let user_id = user_id.to_string();
            let timezone = timezone.map(String::from);
            join_set.spawn(async move {
                let result = this.execute(&user_id, timezone.as_deref(), &call).await;
                (index, result)
            });
        }

        let mut slots: Vec<Option<ToolResult>> = (0..count).map(|_| None).collect();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(e) => warn!("Tool task panicked: {}", e),
            }
        }
        slots
            .into_iter()
            .flatten()
            .collect()
    }

    /// A single tool call. Never fails: collaborator errors come back as
    /// `{"status": "error"}` payloads the model can read.
    async fn execute(
        &self,
        user_id: &str,
        timezone: Option<&str>,
        call: &ToolCallRequest,
    ) -> ToolResult {
        let args = &call.arguments;
        let (payload, intercept) = match call.name.as_str() {
            "lookup_food" => self.run_lookup_food(args).await,
            "find_recipe" => self.run_find_recipe(user_id, args).await,
            "analyze_recipe" => self.run_analyze_recipe(args).await,
            "get_daily_totals" => self.run_daily_totals(user_id, timezone).await,
            "get_goals" => self.run_get_goals(user_id).await,
            other => (
                json!({"status": "error", "error": format!("unknown tool '{}'", other)}),
                None,
            ),
        };
        ToolResult {
            name: call.name.clone(),
            payload,
            intercept,
        }
    }

    async fn run_lookup_food(&self, args: &Value) -> (Value, Option<Intercept>) {
        let food = str_arg(args, "food");
        if food.is_empty() {
            return (json!({"status": "error", "error": "missing 'food'"}), None);
        }
        let portion = {
            let p = str_arg(args, "portion");
            if p.is_empty() { "1 serving".to_string() } else { p }
        };
        match self.lookup.lookup(&food, &portion).await {
            LookupOutcome::Found(m) => {
                let payload = json!({"status": "found", "match": &m});
                let intercept = (m.confidence >= OFFER_TO_LOG_CONFIDENCE)
                    .then(|| Intercept::OfferToLog { food: m, query: food });
                (payload, intercept)
            }
            LookupOutcome::Ambiguous(options) => (
                json!({"status": "ambiguous", "options": &options}),
                Some(Intercept::PickFood { options, query: food }),
            ),
            LookupOutcome::NotFound => (json!({"status": "not_found"}), None),
            LookupOutcome::Failed(reason) => {
                warn!("lookup_food failed: {}", reason);
                (json!({"status": "error", "error": "lookup unavailable"}), None)
            }
        }
    }

    async fn run_find_recipe(&self, user_id: &str, args: &Value) -> (Value, Option<Intercept>) {
        let name = str_arg(args, "name");
        if name.is_empty() {
            return (json!({"status": "error", "error": "missing 'name'"}), None);
        }
        let recipes = match self.db.list_recipes(user_id).await {
            Ok(r) => r,
            Err(e) => {
                warn!("find_recipe store read failed: {}", e);
                return (json!({"status": "error", "error": "store unavailable"}), None);
            }
        };
        let candidates: Vec<MatchCandidate> = recipes
            .iter()
            .map(|r| MatchCandidate {
                id: r.id.clone(),
                name: r.name.clone(),
            })
            .collect();
        match self.matcher.verdict(&name, &candidates) {
            SearchVerdict::Match(hit) => {
                let recipe = recipes.iter().find(|r| r.id == hit.id);
                let payload = match recipe {
                    Some(r) => json!({
                        "status": "found",
                        "recipe": {
                            "id": r.id,
                            "name": r.name,
                            "servings": r.servings,
                            "per_serving": r.per_serving(),
                        }
                    }),
                    None => json!({"status": "not_found"}),
                };
                (
                    payload,
                    Some(Intercept::OneRecipeMatch {
                        id: hit.id,
                        name: hit.name,
                    }),
                )
            }
            SearchVerdict::Ambiguous(hits) => {
                let options: Vec<(String, String)> =
                    hits.iter().map(|h| (h.id.clone(), h.name.clone())).collect();
                (
                    json!({"status": "ambiguous", "options": hits.iter().map(|h| json!({"id": h.id, "name": h.name})).collect::<Vec<_>>()}),
                    Some(Intercept::PickRecipe { options, query: name }),
                )
            }
            SearchVerdict::None => (json!({"status": "not_found"}), None),
        }
    }

    async fn run_analyze_recipe(&self, args: &Value) -> (Value, Option<Intercept>) {
        let text = str_arg(args, "text");
        if text.is_empty() {
            return (json!({"status": "error", "error": "missing 'text'"}), None);
        }
        let mut parsed = match self.language.parse_recipe(&text).await {
            Ok(p) => p,
            Err(e) => {
                warn!("analyze_recipe parse failed: {}", e);
                return (json!({"status": "error", "error": "could not parse recipe"}), None);
            }
        };
        if parsed.ingredients.is_empty() {
            return (json!({"status": "error", "error": "no ingredients recovered"}), None);
        }
        let (batch, warnings) = self.recipe.aggregate_nutrition(&mut parsed).await;
        let needs_servings = parsed.servings.filter(|s| *s > 0.0).is_none();
        let payload = json!({
            "status": "ok",
            "name": &parsed.name,
            "servings": parsed.servings,
            "batch_nutrition": batch,
            "needs_servings": needs_servings,
            "warnings": &warnings,
        });
        let intercept = needs_servings.then(|| {
            Intercept::NeedsServingCount(ServingSizePrompt {
                recipe_name: parsed.name.clone(),
                parsed: parsed.clone(),
                batch_nutrition: batch,
            })
        });
        (payload, intercept)
    }

    async fn run_daily_totals(&self, user_id: &str, timezone: Option<&str>) -> (Value, Option<Intercept>) {
        let offset = timezone
            .and_then(crate::flows::query::parse_utc_offset)
            .unwrap_or_else(|| chrono::FixedOffset::east_opt(0).unwrap());
        let (start, end) = local_day_bounds(chrono::Utc::now(), offset);
        match self.db.food_totals_between(user_id, start, end).await {
            Ok((totals, count)) => (
                json!({"status": "ok", "totals": totals, "entry_count": count}),
                None,
            ),
            Err(e) => {
                warn!("get_daily_totals failed: {}", e);
                (json!({"status": "error", "error": "store unavailable"}), None)
            }
        }
    }

    async fn run_get_goals(&self, user_id: &str) -> (Value, Option<Intercept>) {
        match self.db.list_goals(user_id).await {
            Ok(goals) => {
                let items: Vec<Value> = goals
                    .iter()
                    .map(|g| json!({"field": g.field, "target": g.target}))
                    .collect();
                (json!({"status": "ok", "goals": items}), None)
            }
            Err(e) => {
                warn!("get_goals failed: {}", e);
                (json!({"status": "error", "error": "store unavailable"}), None)
            }
        }
    }

    /// Turn an intercepted result into a pending action plus a
    /// deterministic reply.
    async fn act_on(&self, user_id: &str, intercept: &Intercept) -> Result<AssistantResponse> {
        match intercept {
            Intercept::NeedsServingCount(prompt) => {
                let response = AssistantResponse::success(
                    ResponseType::PendingServingsConfirm,
                    format!(
                        "{} comes to {:.0} kcal for the whole batch. How many \
                         servings does it make?",
                        quoted_or_generic(&prompt.recipe_name),
                        prompt.batch_nutrition.calories
                    ),
                )
                .with_data(json!({"batch_nutrition": prompt.batch_nutrition}));
                self.db
                    .upsert_pending(
                        user_id,
                        &PendingAction::AwaitingServingSize(prompt.clone()),
                    )
                    .await?;
                Ok(response)
            }
            Intercept::OneRecipeMatch { id, name } => {
                let per_serving = match self.db.get_recipe(user_id, id).await? {
                    Some(stored) => stored.recipe.per_serving(),
                    None => remy_common::NutritionValues::default(),
                };
                let response = AssistantResponse::success(
                    ResponseType::ConfirmationFoodLog,
                    format!(
                        "I found '{}' in your recipes ({:.0} kcal per serving). \
                         Log a serving? (yes/no)",
                        name, per_serving.calories
                    ),
                )
                .with_data(json!({"recipe_id": id, "recipe_name": name}));
                self.db
                    .upsert_pending(
                        user_id,
                        &PendingAction::ConfirmLogSavedRecipe(LogSavedRecipe {
                            recipe_id: id.clone(),
                            recipe_name: name.clone(),
                            requested_servings: 1.0,
                        }),
                    )
                    .await?;
                Ok(response)
            }
            Intercept::OfferToLog { food, query } => {
                let response = AssistantResponse::success(
                    ResponseType::ConfirmationFoodLog,
                    format!(
                        "{} ({}) is about {}. Want me to log it? (yes/no)",
                        food.name,
                        food.portion,
                        food.nutrition.summary()
                    ),
                )
                .with_data(json!({"food_name": food.name, "nutrition": food.nutrition}));
                self.db
                    .upsert_pending(
                        user_id,
                        &PendingAction::FoodLog(FoodLogDraft {
                            food_name: food.name.clone(),
                            portion: food.portion.clone(),
                            nutrition: food.nutrition,
                            source: self.lookup.source().to_string(),
                        }),
                    )
                    .await?;
                debug!("Offered to log '{}' (asked about '{}')", food.name, query);
                Ok(response)
            }
            Intercept::PickFood { options, query } => {
                let options: Vec<ClarificationOption> = options
                    .iter()
                    .map(|food| ClarificationOption::Food { food: food.clone() })
                    .collect();
                let question = format!("Which '{}' did you mean?", query);
                let listing = numbered_listing(&options);
                self.db
                    .upsert_pending(
                        user_id,
                        &PendingAction::AwaitingClarification(ClarificationPrompt {
                            question: question.clone(),
                            options,
                            context: query.clone(),
                        }),
                    )
                    .await?;
                Ok(AssistantResponse::success(
                    ResponseType::Clarification,
                    format!("{} {}", question, listing),
                ))
            }
            Intercept::PickRecipe { options, query } => {
                let options: Vec<ClarificationOption> = options
                    .iter()
                    .map(|(id, name)| ClarificationOption::Recipe {
                        recipe_id: id.clone(),
                        name: name.clone(),
                    })
                    .collect();
                let question = format!("I found a few recipes like '{}'.", query);
                let listing = numbered_listing(&options);
                self.db
                    .upsert_pending(
                        user_id,
                        &PendingAction::AwaitingClarification(ClarificationPrompt {
                            question: format!("Which recipe matches '{}'?", query),
                            options,
                            context: query.clone(),
                        }),
                    )
                    .await?;
                Ok(AssistantResponse::success(
                    ResponseType::Clarification,
                    format!("{} Which one? {}", question, listing),
                ))
            }
        }
    }
}

fn str_arg(args: &Value, key: &str) -> String {
    args.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string()
}

fn quoted_or_generic(name: &str) -> String {
    if name.is_empty() {
        "That recipe".to_string()
    } else {
        format!("'{}'", name)
    }
}

/// The tools the model may call, with JSON Schema argument shapes.
pub fn tool_specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: "lookup_food".into(),
            description: "Estimate nutrition for a food and portion.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "food": {"type": "string", "description": "Food name"},
                    "portion": {"type": "string", "description": "Portion like '1 cup'"}
                },
                "required": ["food"]
            }),
        },
        ToolSpec {
            name: "find_recipe".into(),
            description: "Find a recipe the user has saved, by approximate name.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string"}
                },
                "required": ["name"]
            }),
        },
        ToolSpec {
            name: "analyze_recipe".into(),
            description: "Parse recipe text and compute its batch nutrition.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "text": {"type": "string", "description": "The recipe text"}
                },
                "required": ["text"]
            }),
        },
        ToolSpec {
            name: "get_daily_totals".into(),
            description: "Nutrition totals the user has logged today.".into(),
            parameters: json!({"type": "object", "properties": {}}),
        },
        ToolSpec {
            name: "get_goals".into(),
            description: "The user's daily nutrition goals.".into(),
            parameters: json!({"type": "object", "properties": {}}),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FlowConfig, RetryConfig};
    use crate::llm::FakeLanguageService;
    use crate::lookup::FakeNutritionLookup;
    use remy_common::NutritionValues;
    use tempfile::tempdir;

    fn retry() -> RetryPolicy {
        RetryPolicy::from_config(&RetryConfig {
            max_attempts: 1,
            base_delay_ms: 1,
        })
    }

    async fn loop_with(
        language: FakeLanguageService,
        lookup: FakeNutritionLookup,
    ) -> (ToolLoop, Db, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db = Db::open(dir.path().join("t.db")).await.unwrap();
        let language: Arc<dyn LanguageService> = Arc::new(language);
        let lookup: Arc<dyn NutritionLookup> = Arc::new(lookup);
        let recipe = Arc::new(RecipeFlow::new(
            db.clone(),
            Arc::clone(&language),
            Arc::clone(&lookup),
            retry(),
            FlowConfig::default(),
        ));
        let matcher = FuzzyMatcher::new(60.0, 3, 0.85);
        let tool_loop = ToolLoop::new(
            db.clone(),
            language,
            lookup,
            matcher,
            recipe,
            retry(),
            4,
        );
        (tool_loop, db, dir)
    }

    #[tokio::test]
    async fn prose_answers_come_straight_back() {
        let language = FakeLanguageService::always_valid(json!({
            "content": "You have plenty of protein left today."
        }));
        let (tool_loop, _db, _dir) = loop_with(language, FakeNutritionLookup::new(vec![])).await;
        let resp = tool_loop.answer("u1", "how am I doing?", &[], None).await.unwrap();
        assert_eq!(resp.response_type, ResponseType::Answer);
        assert!(resp.message.contains("protein"));
    }

    #[tokio::test]
    async fn confident_lookup_results_become_log_offers() {
        let language = FakeLanguageService::new(vec![Ok(json!({
            "tool_calls": [
                {"name": "lookup_food", "arguments": {"food": "avocado", "portion": "1 medium"}}
            ]
        }))]);
        let lookup = FakeNutritionLookup::always(LookupOutcome::Found(FoodMatch {
            name: "avocado".into(),
            portion: "1 medium".into(),
            nutrition: NutritionValues::new(240.0, 3.0, 12.0, 22.0, 10.0),
            confidence: 0.92,
        }));
        let (tool_loop, db, _dir) = loop_with(language, lookup).await;

        let resp = tool_loop
            .answer("u1", "how many calories in an avocado?", &[], None)
            .await
            .unwrap();
        assert_eq!(resp.response_type, ResponseType::ConfirmationFoodLog);
        assert!(resp.message.contains("avocado"));
        assert!(resp.message.contains("log it?"));
        assert!(matches!(
            db.get_pending("u1").await.unwrap().unwrap().action,
            PendingAction::FoodLog(_)
        ));
    }

    #[tokio::test]
    async fn backend_failure_gets_a_calm_fallback() {
        let language = FakeLanguageService::always_error(LlmError::HttpError("boom".into()));
        let (tool_loop, _db, _dir) = loop_with(language, FakeNutritionLookup::new(vec![])).await;
        let resp = tool_loop.answer("u1", "hello?", &[], None).await.unwrap();
        assert_eq!(resp.response_type, ResponseType::Answer);
        assert!(!resp.message.contains("boom"));
    }
}

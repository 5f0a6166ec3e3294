//! Logging individual foods.
//!
//! The classifier hands over a food name and portion text; this flow looks
//! up nutrition, scales it to the stated portion and either commits the
//! entry or parks it behind a confirmation, depending on how confident the
//! whole chain is.

use anyhow::Result;
use remy_common::{
    AssistantResponse, ClarificationOption, ClarificationPrompt, FoodLogDraft, FoodMatch,
    NutritionValues, PendingAction, ResponseType,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::confirm::{self, ActionContext, ActionKind, Decision};
use crate::llm::LanguageService;
use crate::lookup::{LookupOutcome, NutritionLookup};
use crate::retry::RetryPolicy;
use crate::scaler::NutritionScaler;
use crate::store::{diary::FoodLogEntry, Db};

pub struct FoodLogFlow {
    db: Db,
    lookup: Arc<dyn NutritionLookup>,
    scaler: NutritionScaler,
}

impl FoodLogFlow {
    pub fn new(
        db: Db,
        language: Arc<dyn LanguageService>,
        lookup: Arc<dyn NutritionLookup>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            db,
            lookup,
            scaler: NutritionScaler::new(language, retry),
        }
    }

    /// Log one food. `confidence` is the classifier's 0-100 score for the
    /// whole message; the lookup's own match confidence shrinks it further
    /// before the auto-execute decision.
    pub async fn log_food(
        &self,
        user_id: &str,
        food: &str,
        portion: &str,
        confidence: f64,
    ) -> Result<AssistantResponse> {
        let portion_given = !portion.trim().is_empty();
        let portion = if portion_given { portion } else { "1 serving" };

        match self.lookup.lookup(food, portion).await {
            LookupOutcome::Found(m) => {
                let multiplier = self.scaler.scale(portion, &m.portion).await;
                let nutrition = m.nutrition.scaled(multiplier);
                let draft = FoodLogDraft {
                    food_name: m.name.clone(),
                    portion: portion.to_string(),
                    nutrition,
                    source: self.lookup.source().to_string(),
                };
                let effective = confidence * m.confidence.clamp(0.0, 1.0);
                self.commit_or_confirm(user_id, draft, effective, portion_given)
                    .await
            }
            LookupOutcome::Ambiguous(options) => self.ask_which(user_id, food, options).await,
            LookupOutcome::NotFound => Ok(AssistantResponse::success(
                ResponseType::Clarification,
                format!(
                    "I couldn't find nutrition for '{}'. Could you describe it \
                     differently, maybe with a brand or an amount?",
                    food
                ),
            )),
            LookupOutcome::Failed(reason) => {
                warn!("Food lookup failed for '{}': {}", food, reason);
                Ok(AssistantResponse::success(
                    ResponseType::Answer,
                    "I'm having trouble reaching nutrition data right now. \
                     Mind trying that again in a moment?",
                ))
            }
        }
    }

    /// Write a confirmed draft to the diary. The caller clears the pending
    /// action first so a repeated "yes" cannot log twice.
    pub async fn commit_draft(
        &self,
        user_id: &str,
        draft: &FoodLogDraft,
    ) -> Result<AssistantResponse> {
        let entry = FoodLogEntry::new(
            user_id,
            &draft.food_name,
            &draft.portion,
            draft.nutrition,
            &draft.source,
        );
        self.db.insert_food_entry(&entry).await?;
        debug!("Logged {} for {}", draft.food_name, user_id);
        Ok(logged_response(&draft.food_name, &draft.portion, draft.nutrition))
    }

    /// Log a clarification pick as-is; the user chose it, so no further
    /// confirmation round.
    pub async fn log_match(&self, user_id: &str, food: &FoodMatch) -> Result<AssistantResponse> {
        let portion = if food.portion.is_empty() {
            "1 serving".to_string()
        } else {
            food.portion.clone()
        };
        let entry = FoodLogEntry::new(
            user_id,
            &food.name,
            &portion,
            food.nutrition,
            self.lookup.source(),
        );
        self.db.insert_food_entry(&entry).await?;
        Ok(logged_response(&food.name, &portion, food.nutrition))
    }

    async fn commit_or_confirm(
        &self,
        user_id: &str,
        draft: FoodLogDraft,
        confidence: f64,
        portion_given: bool,
    ) -> Result<AssistantResponse> {
        let ctx = ActionContext {
            confidence,
            is_high_impact: false,
            has_complete_data: portion_given && !draft.nutrition.is_empty(),
            summary: format!(
                "{} ({}): {:.0} kcal",
                draft.food_name, draft.portion, draft.nutrition.calories
            ),
        };
        match confirm::decide(ActionKind::FoodLog, &ctx) {
            Decision::AutoExecute => self.commit_draft(user_id, &draft).await,
            Decision::Confirm { message } => {
                let data = json!({
                    "food_name": draft.food_name,
                    "portion": draft.portion,
                    "nutrition": draft.nutrition,
                });
                self.db
                    .upsert_pending(user_id, &PendingAction::FoodLog(draft))
                    .await?;
                Ok(AssistantResponse::success(ResponseType::ConfirmationFoodLog, message)
                    .with_data(data))
            }
        }
    }

    async fn ask_which(
        &self,
        user_id: &str,
        food: &str,
        options: Vec<FoodMatch>,
    ) -> Result<AssistantResponse> {
        let options: Vec<ClarificationOption> = options
            .into_iter()
            .map(|food| ClarificationOption::Food { food })
            .collect();
        let question = format!("Which '{}' did you mean?", food);
        let listing = numbered_listing(&options);
        let prompt = ClarificationPrompt {
            question: question.clone(),
            options,
            context: food.to_string(),
        };
        let data = json!({"options": prompt.options});
        self.db
            .upsert_pending(user_id, &PendingAction::AwaitingClarification(prompt))
            .await?;
        Ok(AssistantResponse::success(
            ResponseType::Clarification,
            format!("{} {}", question, listing),
        )
        .with_data(data))
    }
}

fn logged_response(name: &str, portion: &str, nutrition: NutritionValues) -> AssistantResponse {
    AssistantResponse::success(
        ResponseType::FoodLogged,
        format!("Logged {} ({}): {}.", name, portion, nutrition.summary()),
    )
    .with_data(json!({
        "food_name": name,
        "portion": portion,
        "nutrition": nutrition,
    }))
}

pub(crate) fn numbered_listing(options: &[ClarificationOption]) -> String {
    let lines: Vec<String> = options
        .iter()
        .enumerate()
        .map(|(i, o)| format!("{}) {}", i + 1, o.label()))
        .collect();
    lines.join(", ")
}

//! The single-slot pending action and its payloads.
//!
//! Exactly one action can await confirmation per user. The enum is tagged
//! so stored JSON stays readable and old rows keep deserializing as
//! variants gain fields.

use crate::nutrition::{FoodMatch, NutritionValues};
use crate::recipe::ParsedRecipe;
use crate::recipe_flow::RecipeFlowState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum PendingAction {
    /// A food-log entry waiting for "yes".
    FoodLog(FoodLogDraft),
    /// A recipe-save flow in progress; the payload carries the whole flow.
    RecipeSave(RecipeFlowState),
    /// One or more goal changes waiting for "yes".
    GoalUpdate(GoalDraft),
    /// Log N servings of an already-saved recipe.
    ConfirmLogSavedRecipe(LogSavedRecipe),
    /// A recipe analysis that still needs a serving count.
    AwaitingServingSize(ServingSizePrompt),
    /// The user must pick between candidate matches.
    AwaitingClarification(ClarificationPrompt),
}

impl PendingAction {
    /// Stable name used in logs and the turn audit.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::FoodLog(_) => "food_log",
            Self::RecipeSave(_) => "recipe_save",
            Self::GoalUpdate(_) => "goal_update",
            Self::ConfirmLogSavedRecipe(_) => "confirm_log_saved_recipe",
            Self::AwaitingServingSize(_) => "awaiting_serving_size",
            Self::AwaitingClarification(_) => "awaiting_clarification",
        }
    }
}

/// Food-log entry held back until the user confirms it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoodLogDraft {
    pub food_name: String,
    pub portion: String,
    pub nutrition: NutritionValues,
    /// Where the numbers came from ("lookup" or "estimate").
    #[serde(default)]
    pub source: String,
}

/// One target change, e.g. field "calories" to 2200.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalChange {
    pub field: String,
    #[serde(deserialize_with = "crate::coerce::lenient_f64")]
    pub target: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalDraft {
    pub changes: Vec<GoalChange>,
}

fn default_one() -> f64 {
    1.0
}

/// "Log my chili" resolved to a saved recipe; servings may come from the
/// request or default to one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogSavedRecipe {
    pub recipe_id: String,
    pub recipe_name: String,
    #[serde(
        default = "default_one",
        deserialize_with = "crate::coerce::lenient_f64"
    )]
    pub requested_servings: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServingSizePrompt {
    pub recipe_name: String,
    pub parsed: ParsedRecipe,
    pub batch_nutrition: NutritionValues,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClarificationOption {
    Recipe { recipe_id: String, name: String },
    Food { food: FoodMatch },
}

impl ClarificationOption {
    pub fn label(&self) -> String {
        match self {
            Self::Recipe { name, .. } => name.clone(),
            Self::Food { food } => {
                if food.portion.is_empty() {
                    food.name.clone()
                } else {
                    format!("{} ({})", food.name, food.portion)
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClarificationPrompt {
    pub question: String,
    pub options: Vec<ClarificationOption>,
    /// What was being disambiguated, e.g. the original food query.
    #[serde(default)]
    pub context: String,
}

/// What the store hands back: the action plus when it was proposed.
/// Age is informational only; records never expire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingRecord {
    pub action: PendingAction,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_type_and_data_envelope() {
        let action = PendingAction::FoodLog(FoodLogDraft {
            food_name: "banana".into(),
            portion: "1 medium".into(),
            nutrition: NutritionValues::new(105.0, 1.3, 27.0, 0.4, 3.1),
            source: "estimate".into(),
        });
        let v = serde_json::to_value(&action).unwrap();
        assert_eq!(v["type"], "food_log");
        assert_eq!(v["data"]["food_name"], "banana");
    }

    #[test]
    fn requested_servings_accepts_strings_and_defaults_to_one() {
        let with_string: PendingAction = serde_json::from_str(
            r#"{"type":"confirm_log_saved_recipe","data":{"recipe_id":"r1","recipe_name":"Chili","requested_servings":"2"}}"#,
        )
        .unwrap();
        match with_string {
            PendingAction::ConfirmLogSavedRecipe(p) => assert_eq!(p.requested_servings, 2.0),
            other => panic!("wrong variant: {}", other.kind()),
        }

        let missing: PendingAction = serde_json::from_str(
            r#"{"type":"confirm_log_saved_recipe","data":{"recipe_id":"r1","recipe_name":"Chili"}}"#,
        )
        .unwrap();
        match missing {
            PendingAction::ConfirmLogSavedRecipe(p) => assert_eq!(p.requested_servings, 1.0),
            other => panic!("wrong variant: {}", other.kind()),
        }
    }

    #[test]
    fn kind_names_are_stable() {
        let action = PendingAction::GoalUpdate(GoalDraft {
            changes: vec![GoalChange {
                field: "calories".into(),
                target: 2200.0,
            }],
        });
        assert_eq!(action.kind(), "goal_update");
    }

    #[test]
    fn clarification_labels_include_portion_for_foods() {
        let opt = ClarificationOption::Food {
            food: FoodMatch {
                name: "greek yogurt".into(),
                portion: "1 cup".into(),
                nutrition: NutritionValues::default(),
                confidence: 0.9,
            },
        };
        assert_eq!(opt.label(), "greek yogurt (1 cup)");
    }
}

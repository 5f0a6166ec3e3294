//! The response envelope every turn produces.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// Machine-readable tag telling the client what kind of turn this was.
///
/// Clients key UI behavior off this, so renames are breaking changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    FoodLogged,
    RecipeLogged,
    RecipeSaved,
    RecipeUpdated,
    GoalUpdated,
    ConfirmationFoodLog,
    ConfirmationGoalUpdate,
    /// Offer to save a recipe that was just analyzed, not user-initiated.
    ConfirmationRecipeSave,
    PendingDuplicateConfirm,
    PendingBatchConfirm,
    PendingServingsConfirm,
    ReadyToSave,
    Clarification,
    DailySummary,
    Answer,
    ActionCancelled,
    Greeting,
    OffTopic,
    FatalError,
}

impl ResponseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FoodLogged => "food_logged",
            Self::RecipeLogged => "recipe_logged",
            Self::RecipeSaved => "recipe_saved",
            Self::RecipeUpdated => "recipe_updated",
            Self::GoalUpdated => "goal_updated",
            Self::ConfirmationFoodLog => "confirmation_food_log",
            Self::ConfirmationGoalUpdate => "confirmation_goal_update",
            Self::ConfirmationRecipeSave => "confirmation_recipe_save",
            Self::PendingDuplicateConfirm => "pending_duplicate_confirm",
            Self::PendingBatchConfirm => "pending_batch_confirm",
            Self::PendingServingsConfirm => "pending_servings_confirm",
            Self::ReadyToSave => "ready_to_save",
            Self::Clarification => "clarification",
            Self::DailySummary => "daily_summary",
            Self::Answer => "answer",
            Self::ActionCancelled => "action_cancelled",
            Self::Greeting => "greeting",
            Self::OffTopic => "off_topic",
            Self::FatalError => "fatal_error",
        }
    }
}

impl fmt::Display for ResponseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What the daemon sends back for one user turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantResponse {
    pub status: ResponseStatus,
    pub message: String,
    pub response_type: ResponseType,
    /// Structured payload for clients that want more than prose, e.g. the
    /// logged nutrition values or clarification options.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl AssistantResponse {
    pub fn success(response_type: ResponseType, message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Success,
            message: message.into(),
            response_type,
            data: None,
        }
    }

    /// The only response with error status. Everything recoverable stays a
    /// success-status turn with a corrective message.
    pub fn fatal_error(message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Error,
            message: message.into(),
            response_type: ResponseType::FatalError,
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

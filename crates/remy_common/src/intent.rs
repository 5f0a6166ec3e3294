//! User intent vocabulary for a single turn.

use serde::{Deserialize, Serialize};
use std::fmt;

/// What the user is trying to do, as labelled by the classifier.
///
/// `Unknown` is a real outcome, not an error: the orchestrator hands those
/// turns to the tool loop instead of guessing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    /// "I ate a banana" - log one or more foods.
    LogFood,
    /// "Log my chili" - log a serving of an already-saved recipe.
    LogRecipe,
    /// "Save this recipe: ..." - store a recipe for later.
    SaveRecipe,
    /// "How much protein today?" - question about intake or foods.
    QueryNutrition,
    /// "Set my calorie goal to 2200".
    UpdateGoals,
    /// Bare agreement ("yes", "sounds good").
    Confirm,
    /// Bare refusal ("no", "never mind").
    Decline,
    /// The user is answering a question we asked.
    Clarify,
    /// "Actually make that two eggs" - amend something recent.
    Modify,
    /// Greetings and pleasantries.
    Greet,
    /// Not about food or nutrition at all.
    OffTopic,
    #[default]
    Unknown,
}

/// Every label the classifier may emit, in prompt order.
pub const ALL_INTENTS: &[Intent] = &[
    Intent::LogFood,
    Intent::LogRecipe,
    Intent::SaveRecipe,
    Intent::QueryNutrition,
    Intent::UpdateGoals,
    Intent::Confirm,
    Intent::Decline,
    Intent::Clarify,
    Intent::Modify,
    Intent::Greet,
    Intent::OffTopic,
    Intent::Unknown,
];

impl Intent {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "log_food" => Some(Self::LogFood),
            "log_recipe" => Some(Self::LogRecipe),
            "save_recipe" => Some(Self::SaveRecipe),
            "query_nutrition" => Some(Self::QueryNutrition),
            "update_goals" => Some(Self::UpdateGoals),
            "confirm" => Some(Self::Confirm),
            "decline" => Some(Self::Decline),
            "clarify" => Some(Self::Clarify),
            "modify" => Some(Self::Modify),
            "greet" => Some(Self::Greet),
            "off_topic" => Some(Self::OffTopic),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }

    /// Intents that start new work. Seeing one of these while a flow is
    /// pending means the user switched topics rather than answering us.
    pub fn is_actionable(&self) -> bool {
        matches!(
            self,
            Self::LogFood
                | Self::LogRecipe
                | Self::SaveRecipe
                | Self::QueryNutrition
                | Self::UpdateGoals
        )
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::LogFood => "log_food",
            Self::LogRecipe => "log_recipe",
            Self::SaveRecipe => "save_recipe",
            Self::QueryNutrition => "query_nutrition",
            Self::UpdateGoals => "update_goals",
            Self::Confirm => "confirm",
            Self::Decline => "decline",
            Self::Clarify => "clarify",
            Self::Modify => "modify",
            Self::Greet => "greet",
            Self::OffTopic => "off_topic",
            Self::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}
